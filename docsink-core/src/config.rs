use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Error;
use crate::Result;
use crate::store::is_valid_name;

/// Catalog of the streams the destination is configured to receive.
pub mod catalog;

use catalog::ConfiguredCatalog;

const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_MARSHAL_WORKERS: usize = 1;
const DEFAULT_SINK_WORKERS: usize = 1;
const DEFAULT_MONGO_PORT: u16 = 27017;

/// Where the documents are written to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum StoreConfig {
    /// Keep everything in process memory, useful for dry runs.
    Memory,
    /// One newline-delimited JSON file per collection under `path/<db_name>`.
    Filesystem { path: PathBuf },
    /// A MongoDB deployment, `db_name` is the database.
    Mongo(MongoConfig),
}

/// Connection settings of a MongoDB deployment.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MongoConfig {
    pub host: String,
    #[serde(default = "default_mongo_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Keeps the password out of the logs.
impl fmt::Debug for MongoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

fn default_mongo_port() -> u16 {
    DEFAULT_MONGO_PORT
}

/// DestinationConfig is the user supplied configuration of the destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    pub store: StoreConfig,
    pub db_name: String,
    #[serde(default)]
    pub enable_basic_normalization: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_marshal_workers")]
    pub marshal_workers: usize,
    #[serde(default = "default_sink_workers")]
    pub sink_workers: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_marshal_workers() -> usize {
    DEFAULT_MARSHAL_WORKERS
}

fn default_sink_workers() -> usize {
    DEFAULT_SINK_WORKERS
}

impl DestinationConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DestinationConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid destination configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_name.trim().is_empty() {
            return Err(Error::Config("db_name must not be empty".to_string()));
        }
        if !is_valid_name(&self.db_name) {
            return Err(Error::Config(format!("invalid db_name {:?}", self.db_name)));
        }
        match &self.store {
            StoreConfig::Memory => {}
            StoreConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err(Error::Config("store path must not be empty".to_string()));
                }
            }
            StoreConfig::Mongo(mongo) => {
                if mongo.host.trim().is_empty() {
                    return Err(Error::Config("mongo host must not be empty".to_string()));
                }
                if mongo.password.is_some() && mongo.user.is_none() {
                    return Err(Error::Config("mongo password given without a user".to_string()));
                }
            }
        }
        check_positive("batch_size", self.batch_size)?;
        check_positive("marshal_workers", self.marshal_workers)?;
        check_positive("sink_workers", self.sink_workers)
    }

    pub fn normalization_mode(&self) -> NormalizationMode {
        if self.enable_basic_normalization {
            NormalizationMode::Projected
        } else {
            NormalizationMode::Raw
        }
    }
}

fn check_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::Config(format!("{name} must be greater than 0")));
    }
    Ok(())
}

/// How a record is turned into a document. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationMode {
    /// The record is wrapped as an opaque payload next to a synthetic id and emission time.
    #[default]
    Raw,
    /// Only the fields declared in the stream schema are kept, in schema order.
    Projected,
}

impl fmt::Display for NormalizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizationMode::Raw => write!(f, "raw"),
            NormalizationMode::Projected => write!(f, "projected"),
        }
    }
}

/// RunConfig is the validated, fixed input of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of documents per stream that triggers a flush.
    pub batch_size: usize,
    pub mode: NormalizationMode,
    pub marshal_workers: usize,
    pub sink_workers: usize,
    /// Ordered field names per stream, only used in [NormalizationMode::Projected].
    pub fields_per_stream: HashMap<String, Vec<String>>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            mode: NormalizationMode::Raw,
            marshal_workers: DEFAULT_MARSHAL_WORKERS,
            sink_workers: DEFAULT_SINK_WORKERS,
            fields_per_stream: HashMap::new(),
        }
    }
}

impl RunConfig {
    pub fn new(config: &DestinationConfig, catalog: &ConfiguredCatalog) -> Result<Self> {
        config.validate()?;
        catalog.validate()?;

        let run_config = RunConfig {
            batch_size: config.batch_size,
            mode: config.normalization_mode(),
            marshal_workers: config.marshal_workers,
            sink_workers: config.sink_workers,
            fields_per_stream: catalog.fields_per_stream(),
        };
        run_config.validate()?;
        Ok(run_config)
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("batch_size", self.batch_size)?;
        check_positive("marshal_workers", self.marshal_workers)?;
        check_positive("sink_workers", self.sink_workers)?;

        for (stream, fields) in &self.fields_per_stream {
            let mut seen = std::collections::HashSet::with_capacity(fields.len());
            if let Some(dup) = fields.iter().find(|f| !seen.insert(f.as_str())) {
                return Err(Error::Config(format!(
                    "stream {stream} declares field {dup} more than once"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_destination_config_defaults() {
        let config = DestinationConfig::from_json(
            &json!({
                "store": {"type": "memory"},
                "db_name": "airbyte"
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.marshal_workers, 1);
        assert_eq!(config.sink_workers, 1);
        assert_eq!(config.normalization_mode(), NormalizationMode::Raw);
    }

    #[test]
    fn test_destination_config_filesystem() {
        let config = DestinationConfig::from_json(
            &json!({
                "store": {"type": "filesystem", "path": "/tmp/docsink"},
                "db_name": "airbyte",
                "enable_basic_normalization": true,
                "batch_size": 3,
                "marshal_workers": 2,
                "sink_workers": 4
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(
            config.store,
            StoreConfig::Filesystem {
                path: PathBuf::from("/tmp/docsink")
            }
        );
        assert_eq!(config.normalization_mode(), NormalizationMode::Projected);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.sink_workers, 4);
    }

    #[test]
    fn test_destination_config_rejects_invalid() {
        let zero_batch = json!({
            "store": {"type": "memory"},
            "db_name": "airbyte",
            "batch_size": 0
        });
        assert!(matches!(
            DestinationConfig::from_json(&zero_batch.to_string()),
            Err(Error::Config(_))
        ));

        let unknown_field = json!({
            "store": {"type": "memory"},
            "db_name": "airbyte",
            "host": "localhost"
        });
        assert!(matches!(
            DestinationConfig::from_json(&unknown_field.to_string()),
            Err(Error::Config(_))
        ));

        let empty_db = json!({"store": {"type": "memory"}, "db_name": " "});
        assert!(matches!(
            DestinationConfig::from_json(&empty_db.to_string()),
            Err(Error::Config(_))
        ));

        assert!(matches!(
            DestinationConfig::from_json("not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_db_name_cannot_escape_the_store() {
        for db_name in ["../x", "..", "a/b", "a\\b", "."] {
            let config = json!({
                "store": {"type": "filesystem", "path": "/tmp/docsink"},
                "db_name": db_name
            });
            assert!(
                matches!(
                    DestinationConfig::from_json(&config.to_string()),
                    Err(Error::Config(_))
                ),
                "{db_name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_destination_config_mongo() {
        let config = DestinationConfig::from_json(
            &json!({
                "store": {"type": "mongo", "host": "localhost", "user": "airbyte", "password": "secret"},
                "db_name": "airbyte"
            })
            .to_string(),
        )
        .unwrap();

        let StoreConfig::Mongo(mongo) = &config.store else {
            panic!("unexpected store {:?}", config.store);
        };
        assert_eq!(mongo.host, "localhost");
        assert_eq!(mongo.port, DEFAULT_MONGO_PORT);
        assert_eq!(mongo.user.as_deref(), Some("airbyte"));
        assert!(!format!("{mongo:?}").contains("secret"));

        let no_user = json!({
            "store": {"type": "mongo", "host": "localhost", "password": "secret"},
            "db_name": "airbyte"
        });
        assert!(matches!(
            DestinationConfig::from_json(&no_user.to_string()),
            Err(Error::Config(_))
        ));

        let unknown = json!({
            "store": {"type": "mongo", "host": "localhost", "uri": "mongodb://x"},
            "db_name": "airbyte"
        });
        assert!(matches!(
            DestinationConfig::from_json(&unknown.to_string()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_run_config_from_catalog() {
        let config = DestinationConfig::from_json(
            &json!({
                "store": {"type": "memory"},
                "db_name": "airbyte",
                "enable_basic_normalization": true,
                "batch_size": 10
            })
            .to_string(),
        )
        .unwrap();
        let catalog = ConfiguredCatalog::from_json(
            &json!({
                "streams": [{
                    "stream": {
                        "name": "users",
                        "json_schema": {"properties": {"id": {}, "name": {}}}
                    },
                    "destination_sync_mode": "overwrite"
                }]
            })
            .to_string(),
        )
        .unwrap();

        let run_config = RunConfig::new(&config, &catalog).unwrap();
        assert_eq!(run_config.batch_size, 10);
        assert_eq!(run_config.mode, NormalizationMode::Projected);
        assert_eq!(
            run_config.fields_per_stream.get("users"),
            Some(&vec!["id".to_string(), "name".to_string()])
        );
    }

    #[test]
    fn test_run_config_validate() {
        let mut run_config = RunConfig::default();
        assert!(run_config.validate().is_ok());

        run_config.sink_workers = 0;
        assert!(matches!(run_config.validate(), Err(Error::Config(_))));

        run_config.sink_workers = 1;
        run_config
            .fields_per_stream
            .insert("users".to_string(), vec!["id".to_string(), "id".to_string()]);
        assert!(matches!(run_config.validate(), Err(Error::Config(_))));
    }
}
