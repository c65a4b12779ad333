use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::Normalize;
use crate::Result;
use crate::message::{Document, Record};

/// ProjectedNormalizer keeps only the fields declared for the stream. A missing field becomes
/// null, undeclared fields are dropped. A stream without declared fields yields an empty
/// document.
#[derive(Debug, Clone, Default)]
pub struct ProjectedNormalizer {
    fields_per_stream: Arc<HashMap<String, Vec<String>>>,
}

impl ProjectedNormalizer {
    pub fn new(fields_per_stream: HashMap<String, Vec<String>>) -> Self {
        Self {
            fields_per_stream: Arc::new(fields_per_stream),
        }
    }

    pub fn fields(&self, stream: &str) -> &[String] {
        self.fields_per_stream
            .get(stream)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Normalize for ProjectedNormalizer {
    fn marshal(&self, mut record: Record) -> Result<Document> {
        let fields = self.fields(&record.stream);
        let mut doc = Document::with_capacity(record.stream.as_str(), fields.len());
        for field in fields {
            let value = record.data.remove(field).unwrap_or(Value::Null);
            doc.push(field.as_str(), value);
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalizer() -> ProjectedNormalizer {
        ProjectedNormalizer::new(HashMap::from([(
            "users".to_string(),
            vec!["id".to_string(), "name".to_string()],
        )]))
    }

    fn record(stream: &str, data: Value) -> Record {
        Record::new(stream, data.as_object().unwrap().clone())
    }

    #[test]
    fn test_projection_drops_undeclared_fields() {
        let doc = normalizer()
            .marshal(record("users", json!({"id": 1, "name": "a", "extra": "x"})))
            .unwrap();

        assert_eq!(doc.stream, "users");
        assert_eq!(
            doc.fields,
            vec![
                ("id".to_string(), json!(1)),
                ("name".to_string(), json!("a"))
            ]
        );
        assert_eq!(doc.get("extra"), None);
    }

    #[test]
    fn test_projection_keeps_schema_order_and_nulls_missing() {
        let doc = normalizer()
            .marshal(record("users", json!({"name": "b"})))
            .unwrap();

        assert_eq!(
            doc.fields,
            vec![
                ("id".to_string(), Value::Null),
                ("name".to_string(), json!("b"))
            ]
        );
    }

    #[test]
    fn test_projection_unknown_stream() {
        let doc = normalizer()
            .marshal(record("orders", json!({"id": 1})))
            .unwrap();
        assert_eq!(doc.stream, "orders");
        assert!(doc.is_empty());
    }
}
