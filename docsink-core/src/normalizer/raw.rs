use serde_json::Value;
use uuid::Uuid;

use super::Normalize;
use crate::Result;
use crate::message::{Document, Record};

pub const ID_FIELD: &str = "id";
pub const EMITTED_AT_FIELD: &str = "emittedAt";
pub const DATA_FIELD: &str = "data";

/// RawNormalizer never fails, every record becomes a document with exactly three fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawNormalizer;

impl Normalize for RawNormalizer {
    fn marshal(&self, record: Record) -> Result<Document> {
        let mut doc = Document::with_capacity(record.stream, 3);
        doc.push(ID_FIELD, Value::String(Uuid::new_v4().to_string()));
        doc.push(
            EMITTED_AT_FIELD,
            Value::String(record.emitted_at.timestamp_millis().to_string()),
        );
        doc.push(DATA_FIELD, Value::String(Value::Object(record.data).to_string()));
        Ok(doc)
    }
}
