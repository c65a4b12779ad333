//! Storage backends the batch sink writes to. A backend exposes per-stream collections that can
//! be reset (dropped) and bulk-inserted into.

use std::fmt;
use std::sync::Arc;

use crate::Result;
use crate::config::{DestinationConfig, StoreConfig};
use crate::message::Document;

/// In process store, keeps a journal of every operation.
mod memory;

/// Newline-delimited JSON files on the local filesystem.
mod filesystem;

/// MongoDB databases, one collection per stream.
mod mongo;

pub use filesystem::FilesystemStore;
pub use memory::{MemoryStore, StoreEvent};
pub use mongo::MongoStore;

/// Names of databases and collections end up in paths and namespaces, anything that could escape
/// them is refused.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !(name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']))
}

/// CollectionHandle is the resolved destination of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionHandle {
    name: Arc<str>,
}

impl CollectionHandle {
    pub(crate) fn new(name: &str) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Set of items to be implemented by a storage backend.
#[trait_variant::make(Store: Send)]
#[allow(dead_code)]
pub trait LocalStore {
    /// Verifies the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Resolves the collection with the given name, creating it if needed.
    async fn collection(&self, name: &str) -> Result<CollectionHandle>;

    /// Drops all the content of the collection.
    async fn reset(&self, collection: &CollectionHandle) -> Result<()>;

    /// Writes the documents, in order, into the collection. Whether a failed call wrote a part of
    /// the documents is up to the backend.
    async fn insert_many(&self, collection: &CollectionHandle, documents: Vec<Document>)
    -> Result<()>;

    /// Releases the connection, nothing is called on the store afterwards.
    async fn close(&self) -> Result<()>;
}

/// The configured backend. Calls go through [Store] explicitly since the local variant of the
/// trait is in scope here as well.
#[derive(Debug, Clone)]
pub enum StoreBackend {
    Memory(MemoryStore),
    Filesystem(FilesystemStore),
    Mongo(MongoStore),
}

impl StoreBackend {
    /// Builds the backend. Nothing is connected yet, see [Store::ping].
    pub fn from_config(config: &DestinationConfig) -> Result<Self> {
        let backend = match &config.store {
            StoreConfig::Memory => StoreBackend::Memory(MemoryStore::new()),
            StoreConfig::Filesystem { path } => {
                StoreBackend::Filesystem(FilesystemStore::new(path, &config.db_name))
            }
            StoreConfig::Mongo(mongo) => {
                StoreBackend::Mongo(MongoStore::new(mongo, &config.db_name)?)
            }
        };
        Ok(backend)
    }
}

impl Store for StoreBackend {
    async fn ping(&self) -> Result<()> {
        match self {
            StoreBackend::Memory(s) => Store::ping(s).await,
            StoreBackend::Filesystem(s) => Store::ping(s).await,
            StoreBackend::Mongo(s) => Store::ping(s).await,
        }
    }

    async fn collection(&self, name: &str) -> Result<CollectionHandle> {
        match self {
            StoreBackend::Memory(s) => Store::collection(s, name).await,
            StoreBackend::Filesystem(s) => Store::collection(s, name).await,
            StoreBackend::Mongo(s) => Store::collection(s, name).await,
        }
    }

    async fn reset(&self, collection: &CollectionHandle) -> Result<()> {
        match self {
            StoreBackend::Memory(s) => Store::reset(s, collection).await,
            StoreBackend::Filesystem(s) => Store::reset(s, collection).await,
            StoreBackend::Mongo(s) => Store::reset(s, collection).await,
        }
    }

    async fn insert_many(
        &self,
        collection: &CollectionHandle,
        documents: Vec<Document>,
    ) -> Result<()> {
        match self {
            StoreBackend::Memory(s) => Store::insert_many(s, collection, documents).await,
            StoreBackend::Filesystem(s) => Store::insert_many(s, collection, documents).await,
            StoreBackend::Mongo(s) => Store::insert_many(s, collection, documents).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            StoreBackend::Memory(s) => Store::close(s).await,
            StoreBackend::Filesystem(s) => Store::close(s).await,
            StoreBackend::Mongo(s) => Store::close(s).await,
        }
    }
}
