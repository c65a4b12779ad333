use std::collections::BTreeMap;
use std::sync::Arc;

use async_channel::Receiver;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::Error;
use crate::Result;
use crate::lifecycle::WorkerGroup;
use crate::message::Document;
use crate::queue::ErrorSink;
use crate::store::{CollectionHandle, Store};

/// Pending documents of one stream.
mod batch;

use batch::StreamBatch;

/// State shared by all the sink workers, guarded by a single lock.
#[derive(Debug, Default)]
struct SinkState {
    batches: BTreeMap<String, StreamBatch>,
    active_workers: usize,
}

/// Sinker is the second stage of the pipeline. Its workers append documents to per-stream
/// batches and bulk insert a batch into the store once it reaches the batch size.
///
/// The first document of a stream binds the stream to its collection and resets the collection,
/// dropping whatever the previous run left there (overwrite sync). That happens once per stream
/// and run.
///
/// Every read-modify-write of the batches happens inside one acquisition of the state lock,
/// flushes included, so no worker ever sees a batch at or above the batch size.
///
/// Shutdown: once the document queue is closed and drained, each worker decrements the active
/// worker count. The worker that brings it to zero flushes every non-empty batch, still holding
/// the lock, so the final flush runs exactly once and after every append.
///
/// A worker that panics or is aborted closes the document queue on its way out. The whole stage stops, pending
/// sends of the marshalers fail instead of blocking, and no final flush happens.
pub(crate) struct Sinker<S> {
    store: Arc<S>,
    state: Arc<Mutex<SinkState>>,
    documents: Receiver<Document>,
    errors: ErrorSink,
    batch_size: usize,
    workers: WorkerGroup,
}

impl<S> Sinker<S>
where
    S: Store + Sync + 'static,
{
    pub(crate) fn new(
        store: Arc<S>,
        batch_size: usize,
        documents: Receiver<Document>,
        errors: ErrorSink,
    ) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(SinkState::default())),
            documents,
            errors,
            batch_size,
            workers: WorkerGroup::new("sink"),
        }
    }

    /// Starts one more worker. The worker is counted as active before it is spawned.
    pub(crate) async fn add_worker(&mut self) {
        self.state.lock().await.active_workers += 1;

        let worker = SinkWorker {
            id: self.workers.len(),
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            documents: self.documents.clone(),
            errors: self.errors.clone(),
            batch_size: self.batch_size,
        };
        self.workers.spawn(worker.run());
    }

    /// Waits until every worker has exited, which implies the final flush has completed.
    pub(crate) async fn wait(self) -> Result<()> {
        let Sinker {
            documents, workers, ..
        } = self;
        drop(documents);
        workers.wait().await
    }
}

struct SinkWorker<S> {
    id: usize,
    store: Arc<S>,
    state: Arc<Mutex<SinkState>>,
    documents: Receiver<Document>,
    errors: ErrorSink,
    batch_size: usize,
}

impl<S> SinkWorker<S>
where
    S: Store + Sync + 'static,
{
    async fn run(self) {
        let mut guard = CloseOnAbort {
            worker: self.id,
            documents: self.documents.clone(),
            done: false,
        };
        info!(worker = self.id, "Sink worker started");
        while let Ok(document) = self.documents.recv().await {
            self.write(document).await;
        }
        self.exit().await;
        guard.done = true;
        info!(worker = self.id, "Sink worker completed");
    }

    async fn write(&self, document: Document) {
        let mut state = self.state.lock().await;

        if !state.batches.contains_key(&document.stream) {
            match self.bind(&document.stream).await {
                Ok(collection) => {
                    let batch =
                        StreamBatch::new(document.stream.as_str(), collection, self.batch_size);
                    state.batches.insert(document.stream.clone(), batch);
                }
                Err(e) => {
                    // the stream stays unbound, the next document tries again
                    self.errors.report(Error::Sink(format!(
                        "failed to prepare collection for stream {}, dropping document: {e}",
                        document.stream
                    )));
                    return;
                }
            }
        }

        let Some(batch) = state.batches.get_mut(&document.stream) else {
            return;
        };
        batch.push(document);
        if batch.len() < self.batch_size {
            return;
        }
        batch.flush(self.store.as_ref(), &self.errors).await;
    }

    /// Resolves the collection of the stream and drops its previous content.
    async fn bind(&self, stream: &str) -> Result<CollectionHandle> {
        let collection = self.store.collection(stream).await?;
        self.store.reset(&collection).await?;
        info!(stream, %collection, "Collection reset for overwrite sync");
        Ok(collection)
    }

    async fn exit(&self) {
        let mut state = self.state.lock().await;
        state.active_workers = state.active_workers.saturating_sub(1);
        if state.active_workers > 0 {
            debug!(
                worker = self.id,
                remaining = state.active_workers,
                "Sink worker exiting"
            );
            return;
        }

        info!(
            worker = self.id,
            streams = state.batches.len(),
            "Last sink worker exiting, flushing pending batches"
        );
        for (stream, batch) in state.batches.iter_mut() {
            if batch.is_empty() {
                continue;
            }
            debug!(stream = %stream, documents = batch.len(), "Final flush");
            batch.flush(self.store.as_ref(), &self.errors).await;
        }
    }
}

/// Closes the document queue when a sink worker is dropped before it completed, which happens
/// when it panics or is aborted.
struct CloseOnAbort {
    worker: usize,
    documents: Receiver<Document>,
    done: bool,
}

impl Drop for CloseOnAbort {
    fn drop(&mut self) {
        if !self.done {
            error!(
                worker = self.worker,
                "Sink worker did not complete, closing the document queue"
            );
            self.documents.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::error_channel;
    use crate::store::{MemoryStore, StoreEvent};
    use serde_json::json;

    fn doc(stream: &str, id: usize) -> Document {
        let mut doc = Document::new(stream);
        doc.push("id", json!(id));
        doc
    }

    async fn run_sinker(
        store: &MemoryStore,
        batch_size: usize,
        workers: usize,
        documents: Vec<Document>,
    ) -> Vec<Error> {
        let (doc_tx, doc_rx) = async_channel::bounded(1);
        let (errors, error_stream) = error_channel();

        let mut sinker = Sinker::new(Arc::new(store.clone()), batch_size, doc_rx, errors.clone());
        for _ in 0..workers {
            sinker.add_worker().await;
        }

        for document in documents {
            doc_tx.send(document).await.unwrap();
        }
        doc_tx.close();

        sinker.wait().await.unwrap();
        errors.close();
        error_stream.collect().await
    }

    #[tokio::test]
    async fn test_flush_at_threshold_and_on_drain() {
        let store = MemoryStore::new();
        let documents = (0..7).map(|i| doc("users", i)).collect();

        let errors = run_sinker(&store, 3, 1, documents).await;

        assert!(errors.is_empty());
        assert_eq!(store.insert_sizes("users"), vec![3, 3, 1]);
        let ids: Vec<_> = store
            .documents("users")
            .iter()
            .map(|d| d.get("id").cloned().unwrap())
            .collect();
        assert_eq!(ids, (0..7).map(|i| json!(i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_drain_insert() {
        let store = MemoryStore::new();
        let documents = (0..6).map(|i| doc("users", i)).collect();

        run_sinker(&store, 3, 2, documents).await;

        assert_eq!(store.insert_sizes("users"), vec![3, 3]);
    }

    #[tokio::test]
    async fn test_single_reset_per_stream() {
        let store = MemoryStore::new();
        let users = store.collection("users").await.unwrap();
        store
            .insert_many(&users, vec![doc("users", 999)])
            .await
            .unwrap();

        let documents = (0..50)
            .map(|i| doc(if i % 2 == 0 { "users" } else { "orders" }, i))
            .collect();
        run_sinker(&store, 4, 4, documents).await;

        assert_eq!(store.reset_count("users"), 1);
        assert_eq!(store.reset_count("orders"), 1);
        assert_eq!(store.documents("users").len(), 25);
        assert_eq!(store.documents("orders").len(), 25);
        assert!(
            store
                .documents("users")
                .iter()
                .all(|d| d.get("id") != Some(&json!(999)))
        );

        // the reset of a stream comes before any of its inserts
        let journal = store.journal();
        let first_reset = journal
            .iter()
            .position(|e| matches!(e, StoreEvent::Reset { collection } if collection == "users"))
            .unwrap();
        let inserts_before_reset = journal
            .iter()
            .take(first_reset)
            .filter(|e| matches!(e, StoreEvent::Insert { collection, .. } if collection == "users"))
            .count();
        // the seed insert only
        assert_eq!(inserts_before_reset, 1);
    }

    #[tokio::test]
    async fn test_many_workers_no_loss() {
        let store = MemoryStore::new();
        let documents = (0..1000).map(|i| doc("users", i)).collect();

        let errors = run_sinker(&store, 7, 8, documents).await;

        assert!(errors.is_empty());
        let sizes = store.insert_sizes("users");
        assert_eq!(sizes.iter().sum::<usize>(), 1000);
        // 1000 = 142 * 7 + 6
        assert_eq!(sizes.len(), 143);
        assert!(sizes.iter().take(142).all(|&s| s == 7));
        assert_eq!(sizes.last(), Some(&6));
    }

    #[tokio::test]
    async fn test_no_documents_no_inserts() {
        let store = MemoryStore::new();
        let errors = run_sinker(&store, 3, 3, Vec::new()).await;

        assert!(errors.is_empty());
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_insert_failure_drops_batch() {
        let store = MemoryStore::new();
        store.fail_inserts("users");
        let documents = (0..5).map(|i| doc("users", i)).collect();

        let errors = run_sinker(&store, 3, 1, documents).await;

        // one dead letter at threshold and one for the remainder at drain
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], Error::Sink(msg) if msg.starts_with("dropped 3 documents")));
        assert!(matches!(&errors[1], Error::Sink(msg) if msg.starts_with("dropped 2 documents")));
        assert!(store.insert_sizes("users").is_empty());
        assert_eq!(store.reset_count("users"), 1);
    }

    #[tokio::test]
    async fn test_reset_failure_retries_binding() {
        let store = MemoryStore::new();
        store.fail_resets("users");
        let (doc_tx, doc_rx) = async_channel::bounded(1);
        let (errors, error_stream) = error_channel();

        let mut sinker = Sinker::new(Arc::new(store.clone()), 2, doc_rx, errors.clone());
        sinker.add_worker().await;

        doc_tx.send(doc("users", 0)).await.unwrap();
        let reported = error_stream.recv().await.unwrap();
        assert!(matches!(reported, Error::Sink(msg) if msg.contains("dropping document")));

        store.recover("users");
        for i in 1..4 {
            doc_tx.send(doc("users", i)).await.unwrap();
        }
        doc_tx.close();
        sinker.wait().await.unwrap();
        errors.close();

        assert!(error_stream.collect().await.is_empty());
        assert_eq!(store.reset_count("users"), 1);
        assert_eq!(store.insert_sizes("users"), vec![2, 1]);
    }

    struct PanicOnInsert(MemoryStore);

    impl Store for PanicOnInsert {
        async fn ping(&self) -> Result<()> {
            self.0.ping().await
        }

        async fn collection(&self, name: &str) -> Result<CollectionHandle> {
            self.0.collection(name).await
        }

        async fn reset(&self, collection: &CollectionHandle) -> Result<()> {
            self.0.reset(collection).await
        }

        async fn insert_many(&self, _: &CollectionHandle, _: Vec<Document>) -> Result<()> {
            panic!("insert failed hard");
        }

        async fn close(&self) -> Result<()> {
            self.0.close().await
        }
    }

    #[tokio::test]
    async fn test_panicked_worker_closes_document_queue() {
        let (doc_tx, doc_rx) = async_channel::bounded(1);
        let (errors, _error_stream) = error_channel();

        let store = Arc::new(PanicOnInsert(MemoryStore::new()));
        let mut sinker = Sinker::new(store, 1, doc_rx, errors);
        sinker.add_worker().await;
        sinker.add_worker().await;

        // sends fail once a worker went down, instead of blocking forever
        let mut sent = 0;
        while doc_tx.send(doc("users", sent)).await.is_ok() {
            sent += 1;
        }
        assert!(doc_tx.is_closed());
        assert!(sent >= 1);

        assert!(matches!(sinker.wait().await, Err(Error::Worker(_))));
    }
}
