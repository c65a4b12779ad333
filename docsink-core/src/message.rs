//! The two units moving through the pipeline: [Record]s read from the upstream source and the
//! [Document]s the marshalers build out of them.

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

/// Record is a single input item of a stream. It is consumed by exactly one marshal worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Name of the stream the record belongs to.
    pub stream: String,
    /// Field name to value mapping, values can be arbitrarily nested.
    pub data: Map<String, Value>,
    /// Time the upstream source emitted the record.
    pub emitted_at: DateTime<Utc>,
}

impl Record {
    pub fn new(stream: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            stream: stream.into(),
            data,
            emitted_at: Utc::now(),
        }
    }

    pub fn with_emitted_at(mut self, emitted_at: DateTime<Utc>) -> Self {
        self.emitted_at = emitted_at;
        self
    }
}

/// Document is the destination-native shape of a [Record], an ordered sequence of fields. Field
/// order is significant and preserved all the way to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub stream: String,
    pub fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            fields: Vec::new(),
        }
    }

    pub(crate) fn with_capacity(stream: impl Into<String>, capacity: usize) -> Self {
        Self {
            stream: stream.into(),
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: Value) {
        self.fields.push((key.into(), value));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Documents serialize as a JSON object whose keys keep the field order.
impl Serialize for Document {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
