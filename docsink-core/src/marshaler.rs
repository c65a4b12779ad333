use std::sync::Arc;

use async_channel::{Receiver, Sender};
use tracing::{debug, info};

use crate::Error;
use crate::Result;
use crate::lifecycle::WorkerGroup;
use crate::message::{Document, Record};
use crate::normalizer::Normalize;
use crate::queue::ErrorSink;

/// Marshaler is the first stage of the pipeline. Its workers pull records from the shared record
/// queue, normalize them and push the documents to the shared document queue.
///
/// Error handling: a record that cannot be marshaled is reported on the error sink and dropped,
/// the worker moves on to the next record. A worker exits once the record queue is closed and
/// drained. There is no ordering between workers, each one keeps the order of the records it
/// dequeued itself.
pub(crate) struct Marshaler<N> {
    normalizer: Arc<N>,
    records: Receiver<Record>,
    documents: Sender<Document>,
    errors: ErrorSink,
    workers: WorkerGroup,
}

impl<N> Marshaler<N>
where
    N: Normalize + Send + Sync + 'static,
{
    pub(crate) fn new(
        normalizer: Arc<N>,
        records: Receiver<Record>,
        documents: Sender<Document>,
        errors: ErrorSink,
    ) -> Self {
        Self {
            normalizer,
            records,
            documents,
            errors,
            workers: WorkerGroup::new("marshal"),
        }
    }

    /// Starts one more worker.
    pub(crate) fn add_worker(&mut self) {
        let worker = MarshalWorker {
            id: self.workers.len(),
            normalizer: Arc::clone(&self.normalizer),
            records: self.records.clone(),
            documents: self.documents.clone(),
            errors: self.errors.clone(),
        };
        self.workers.spawn(worker.run());
    }

    /// Waits until every worker has drained the record queue and exited.
    pub(crate) async fn wait(self) -> Result<()> {
        let Marshaler {
            records,
            documents,
            workers,
            ..
        } = self;
        drop(records);
        drop(documents);
        workers.wait().await
    }
}

struct MarshalWorker<N> {
    id: usize,
    normalizer: Arc<N>,
    records: Receiver<Record>,
    documents: Sender<Document>,
    errors: ErrorSink,
}

impl<N> MarshalWorker<N>
where
    N: Normalize + Send + Sync + 'static,
{
    async fn run(self) {
        info!(worker = self.id, "Marshal worker started");
        let mut marshaled = 0usize;

        while let Ok(record) = self.records.recv().await {
            let document = match self.normalizer.marshal(record) {
                Ok(document) => document,
                Err(e) => {
                    self.errors.report(e);
                    continue;
                }
            };

            let stream = document.stream.clone();
            if self.documents.send(document).await.is_err() {
                // nobody is left to consume, the document is lost
                self.errors.report(Error::Marshal(format!(
                    "document queue is closed, dropping document of stream {stream}"
                )));
                continue;
            }
            marshaled += 1;
        }

        debug!(worker = self.id, marshaled, "Record queue closed and drained");
        info!(worker = self.id, "Marshal worker completed");
    }
}
