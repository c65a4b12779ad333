//! Hand-off channels between the host and the two stages.
//!
//! ```text
//! (host) --[records]--> (marshalers) --[documents]--> (sinkers)
//!              \                |                       |
//!               \               +------> [errors] <-----+
//!                \                           |
//!                 +------------------------- v -----> (host)
//! ```
//!
//! Every queue is multi-producer and multi-consumer. Closing a queue lets the consumers drain what
//! is still buffered, after that `recv` fails and the consumer exits.

use async_channel::{Receiver, Sender};
use tracing::{error, warn};

use crate::Error;
use crate::message::Record;

/// Capacity of the record and document queues. One slot keeps the hand-off as close to a
/// rendezvous as the channel allows.
pub(crate) const QUEUE_CAPACITY: usize = 1;

pub type RecordSender = Sender<Record>;
pub type RecordReceiver = Receiver<Record>;

/// Creates the queue the host feeds records into. The host closes it (or drops every sender) once
/// there is no more input.
pub fn record_channel() -> (RecordSender, RecordReceiver) {
    async_channel::bounded(QUEUE_CAPACITY)
}

/// Creates the error channel. The sink side is handed to the pipeline which closes it once both
/// stages have fully drained.
pub fn error_channel() -> (ErrorSink, ErrorStream) {
    let (tx, rx) = async_channel::unbounded();
    (ErrorSink { tx }, ErrorStream { rx })
}

/// ErrorSink is the write-only side of the error channel. Reporting never blocks.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: Sender<Error>,
}

impl ErrorSink {
    pub(crate) fn report(&self, err: Error) {
        error!(%err, "Reporting error");
        if self.tx.try_send(err).is_err() {
            warn!("Error sink is closed, dropping the error");
        }
    }

    /// Closes the channel, returns false if it was already closed.
    pub(crate) fn close(&self) -> bool {
        self.tx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// ErrorStream is the read side of the error channel, held by the host.
#[derive(Debug, Clone)]
pub struct ErrorStream {
    rx: Receiver<Error>,
}

impl ErrorStream {
    /// Waits for the next error, `None` once the channel is closed and drained.
    pub async fn recv(&self) -> Option<Error> {
        self.rx.recv().await.ok()
    }

    /// Collects every error until the channel is closed.
    pub async fn collect(self) -> Vec<Error> {
        let mut errors = Vec::new();
        while let Some(err) = self.recv().await {
            errors.push(err);
        }
        errors
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_channel_close() {
        let (sink, stream) = error_channel();
        sink.report(Error::Marshal("bad record".to_string()));
        assert!(!stream.is_closed());

        assert!(sink.close());
        assert!(!sink.close());
        assert!(sink.is_closed());

        // reporting after close is dropped, not a panic
        sink.report(Error::Sink("late".to_string()));

        let errors = stream.collect().await;
        assert_eq!(errors, vec![Error::Marshal("bad record".to_string())]);
    }

    #[tokio::test]
    async fn test_record_channel_drains_after_close() {
        let (tx, rx) = record_channel();
        tx.send(Record::new("users", Default::default()))
            .await
            .unwrap();
        tx.close();

        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_err());
    }
}
