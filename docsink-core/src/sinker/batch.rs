use tracing::debug;

use crate::Error;
use crate::message::Document;
use crate::queue::ErrorSink;
use crate::store::{CollectionHandle, Store};

/// StreamBatch holds the documents of one stream that are waiting for a bulk insert, together
/// with the collection they go to.
#[derive(Debug)]
pub(crate) struct StreamBatch {
    stream: String,
    collection: CollectionHandle,
    pending: Vec<Document>,
}

impl StreamBatch {
    pub(crate) fn new(
        stream: impl Into<String>,
        collection: CollectionHandle,
        capacity: usize,
    ) -> Self {
        Self {
            stream: stream.into(),
            collection,
            pending: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, document: Document) {
        self.pending.push(document);
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes all the pending documents with a single bulk insert. The batch is empty afterwards
    /// whatever the outcome; documents of a failed insert are reported on the error sink as a
    /// dead letter and dropped.
    pub(crate) async fn flush<S>(&mut self, store: &S, errors: &ErrorSink)
    where
        S: Store + Sync,
    {
        let documents = std::mem::take(&mut self.pending);
        let count = documents.len();

        match store.insert_many(&self.collection, documents).await {
            Ok(()) => debug!(
                stream = %self.stream,
                collection = %self.collection,
                documents = count,
                "Flushed batch"
            ),
            Err(e) => errors.report(Error::Sink(format!(
                "dropped {count} documents of stream {} (collection {}): {e}",
                self.stream, self.collection
            ))),
        }
    }
}
