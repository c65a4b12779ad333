use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{CollectionHandle, Store};
use crate::Error;
use crate::Result;
use crate::message::Document;

/// An operation applied to a [MemoryStore], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Reset { collection: String },
    Insert { collection: String, documents: usize },
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, Vec<Document>>,
    journal: Vec<StoreEvent>,
    failing_inserts: HashSet<String>,
    failing_resets: HashSet<String>,
    unreachable: bool,
}

/// MemoryStore keeps the collections in process. Clones share the same state, so a test can hold
/// on to one clone while the pipeline writes through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Documents currently stored in the collection.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn journal(&self) -> Vec<StoreEvent> {
        self.state().journal.clone()
    }

    /// Sizes of the inserts into the collection, in call order.
    pub fn insert_sizes(&self, collection: &str) -> Vec<usize> {
        self.state()
            .journal
            .iter()
            .filter_map(|event| match event {
                StoreEvent::Insert {
                    collection: c,
                    documents,
                } if c == collection => Some(*documents),
                _ => None,
            })
            .collect()
    }

    pub fn reset_count(&self, collection: &str) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|event| matches!(event, StoreEvent::Reset { collection: c } if c == collection))
            .count()
    }

    /// Makes every insert into the collection fail until [MemoryStore::recover] is called.
    pub fn fail_inserts(&self, collection: &str) {
        self.state().failing_inserts.insert(collection.to_string());
    }

    /// Makes every reset of the collection fail until [MemoryStore::recover] is called.
    pub fn fail_resets(&self, collection: &str) {
        self.state().failing_resets.insert(collection.to_string());
    }

    pub fn recover(&self, collection: &str) {
        let mut state = self.state();
        state.failing_inserts.remove(collection);
        state.failing_resets.remove(collection);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }
}

impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        if self.state().unreachable {
            return Err(Error::Store("memory store is unreachable".to_string()));
        }
        Ok(())
    }

    async fn collection(&self, name: &str) -> Result<CollectionHandle> {
        self.state().collections.entry(name.to_string()).or_default();
        Ok(CollectionHandle::new(name))
    }

    async fn reset(&self, collection: &CollectionHandle) -> Result<()> {
        let mut state = self.state();
        if state.failing_resets.contains(collection.name()) {
            return Err(Error::Store(format!(
                "failed to drop collection {collection}"
            )));
        }
        state.journal.push(StoreEvent::Reset {
            collection: collection.name().to_string(),
        });
        if let Some(documents) = state.collections.get_mut(collection.name()) {
            documents.clear();
        }
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &CollectionHandle,
        documents: Vec<Document>,
    ) -> Result<()> {
        let mut state = self.state();
        if state.failing_inserts.contains(collection.name()) {
            return Err(Error::Store(format!(
                "failed to insert {} documents into {collection}",
                documents.len()
            )));
        }
        state.journal.push(StoreEvent::Insert {
            collection: collection.name().to_string(),
            documents: documents.len(),
        });
        state
            .collections
            .entry(collection.name().to_string())
            .or_default()
            .extend(documents);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
