//! Line-delimited JSON messages exchanged with the orchestrator. Every line on stdin and stdout is
//! one [Message]; logs never go to stdout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use docsink_core::message::Record;
use docsink_core::queue::{ErrorStream, RecordSender};
use docsink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum Message {
    Record {
        record: RecordMessage,
    },
    Log {
        log: LogMessage,
    },
    ConnectionStatus {
        #[serde(rename = "connectionStatus")]
        connection_status: ConnectionStatus,
    },
    Spec {
        spec: Value,
    },
    /// STATE, CATALOG and the rest, a destination has no use for them.
    #[serde(other)]
    Other,
}

impl Message {
    pub(crate) fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Message::Log {
            log: LogMessage {
                level,
                message: message.into(),
            },
        }
    }

    pub(crate) fn connection_status(result: &Result<()>) -> Self {
        let connection_status = match result {
            Ok(()) => ConnectionStatus {
                status: Status::Succeeded,
                message: None,
            },
            Err(e) => ConnectionStatus {
                status: Status::Failed,
                message: Some(e.to_string()),
            },
        };
        Message::ConnectionStatus { connection_status }
    }

    /// The connector specification, the JSON schema of the destination configuration.
    pub(crate) fn spec() -> Self {
        Message::Spec {
            spec: json!({
                "supportsNormalization": true,
                "supportsDBT": false,
                "supported_destination_sync_modes": ["overwrite"],
                "connectionSpecification": {
                    "title": "Docsink",
                    "description": "Writes every stream into its own collection of a document store",
                    "type": "object",
                    "required": ["store", "db_name"],
                    "additionalProperties": false,
                    "properties": {
                        "store": {
                            "description": "Where the collections are kept",
                            "oneOf": [
                                {
                                    "title": "Memory",
                                    "type": "object",
                                    "required": ["type"],
                                    "properties": {"type": {"const": "memory"}}
                                },
                                {
                                    "title": "Filesystem",
                                    "type": "object",
                                    "required": ["type", "path"],
                                    "properties": {
                                        "type": {"const": "filesystem"},
                                        "path": {"type": "string", "examples": ["/local/docsink"]}
                                    }
                                },
                                {
                                    "title": "MongoDB",
                                    "type": "object",
                                    "required": ["type", "host"],
                                    "properties": {
                                        "type": {"const": "mongo"},
                                        "host": {"type": "string", "examples": ["localhost"]},
                                        "port": {"type": "integer", "minimum": 1, "maximum": 65535, "default": 27017},
                                        "user": {"type": "string"},
                                        "password": {"type": "string", "airbyte_secret": true}
                                    }
                                }
                            ]
                        },
                        "db_name": {
                            "description": "Name of the database",
                            "type": "string"
                        },
                        "enable_basic_normalization": {
                            "description": "Write the schema properties of the stream as top level fields instead of the raw record",
                            "type": "boolean",
                            "default": false
                        },
                        "batch_size": {
                            "description": "Number of documents of a stream written in one bulk insert",
                            "type": "integer",
                            "minimum": 1,
                            "default": 1000
                        },
                        "marshal_workers": {"type": "integer", "minimum": 1, "default": 1},
                        "sink_workers": {"type": "integer", "minimum": 1, "default": 1}
                    }
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RecordMessage {
    pub(crate) stream: String,
    pub(crate) data: Map<String, Value>,
    /// Milliseconds since the epoch.
    pub(crate) emitted_at: i64,
}

impl TryFrom<RecordMessage> for Record {
    type Error = Error;

    fn try_from(value: RecordMessage) -> Result<Self> {
        let emitted_at = DateTime::<Utc>::from_timestamp_millis(value.emitted_at).ok_or_else(|| {
            Error::Marshal(format!(
                "invalid emitted_at {} for a record of stream {}",
                value.emitted_at, value.stream
            ))
        })?;
        Ok(Record::new(value.stream, value.data).with_emitted_at(emitted_at))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LogMessage {
    pub(crate) level: LogLevel,
    pub(crate) message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ConnectionStatus {
    pub(crate) status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum Status {
    Succeeded,
    Failed,
}

/// Writes one message per line. Shared between the tasks that talk to the orchestrator.
pub(crate) struct MessageWriter<W> {
    out: W,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(out: W) -> Self {
        Self { out }
    }

    pub(crate) async fn write(&mut self, message: &Message) -> Result<()> {
        let mut line = serde_json::to_vec(message)
            .map_err(|e| Error::Io(format!("failed to encode message: {e}")))?;
        line.push(b'\n');
        self.out.write_all(&line).await?;
        self.out.flush().await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.out
    }
}

pub(crate) type SharedWriter<W> = Arc<Mutex<MessageWriter<W>>>;

/// Counters of one pass over the input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadStats {
    pub(crate) records: usize,
    pub(crate) skipped: usize,
}

/// Forwards every RECORD message of the input to the record queue until the input ends. The
/// queue is closed on return, so the pipeline sees the end of the input.
pub(crate) async fn read_records<R, W>(
    input: R,
    records: RecordSender,
    writer: SharedWriter<W>,
) -> Result<ReadStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = ReadStats::default();
    let mut lines = input.lines();

    let result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(Error::from(e)),
        };
        if line.trim().is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<Message>(&line) {
            Ok(Message::Record { record }) => Record::try_from(record),
            Ok(other) => {
                debug!(?other, "Ignoring message");
                continue;
            }
            Err(e) => Err(Error::Marshal(format!("malformed message: {e}"))),
        };

        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(%e, "Skipping input line");
                stats.skipped += 1;
                if let Err(e) = writer
                    .lock()
                    .await
                    .write(&Message::log(LogLevel::Warn, e.to_string()))
                    .await
                {
                    break Err(e);
                }
                continue;
            }
        };

        if records.send(record).await.is_err() {
            break Err(Error::Worker(
                "record queue closed before the end of the input".to_string(),
            ));
        }
        stats.records += 1;
    };

    records.close();
    info!(records = stats.records, skipped = stats.skipped, "Input consumed");
    result.map(|_| stats)
}

/// Prints every reported error as an ERROR log message until the error sink is closed.
pub(crate) async fn print_errors<W>(errors: ErrorStream, writer: SharedWriter<W>) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut printed = 0;
    while let Some(err) = errors.recv().await {
        writer
            .lock()
            .await
            .write(&Message::log(LogLevel::Error, err.to_string()))
            .await?;
        printed += 1;
    }
    Ok(printed)
}
