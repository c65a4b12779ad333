use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::Error;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfiguredCatalog {
    pub streams: Vec<ConfiguredStream>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConfiguredStream {
    pub stream: StreamDescriptor,
    #[serde(default)]
    pub destination_sync_mode: DestinationSyncMode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default)]
    pub json_schema: JsonSchema,
}

/// Only the declared properties are of interest, their order is the order of the fields in a
/// projected document.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct JsonSchema {
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationSyncMode {
    /// Every run replaces the previous content of the stream's collection.
    #[default]
    Overwrite,
    Append,
    AppendDedup,
}

impl fmt::Display for DestinationSyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationSyncMode::Overwrite => write!(f, "overwrite"),
            DestinationSyncMode::Append => write!(f, "append"),
            DestinationSyncMode::AppendDedup => write!(f, "append_dedup"),
        }
    }
}

impl ConfiguredCatalog {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid configured catalog: {e}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read catalog file {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Stream names must be unique and every stream must use overwrite sync, the only mode the
    /// destination supports.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::with_capacity(self.streams.len());
        for configured in &self.streams {
            let name = configured.stream.name.as_str();
            if name.is_empty() {
                return Err(Error::Config("stream name must not be empty".to_string()));
            }
            if !names.insert(name) {
                return Err(Error::Config(format!("stream {name} is configured twice")));
            }
            if configured.destination_sync_mode != DestinationSyncMode::Overwrite {
                return Err(Error::Config(format!(
                    "stream {name} uses unsupported sync mode {}",
                    configured.destination_sync_mode
                )));
            }
        }
        Ok(())
    }

    /// Declared field names of every stream, in declaration order.
    pub fn fields_per_stream(&self) -> HashMap<String, Vec<String>> {
        self.streams
            .iter()
            .map(|configured| {
                let fields = configured
                    .stream
                    .json_schema
                    .properties
                    .keys()
                    .cloned()
                    .collect();
                (configured.stream.name.clone(), fields)
            })
            .collect()
    }
}
