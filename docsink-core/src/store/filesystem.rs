use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{CollectionHandle, Store, is_valid_name};
use crate::Error;
use crate::Result;
use crate::message::Document;

const COLLECTION_EXTENSION: &str = "jsonl";
const PING_FILE: &str = ".docsink-ping";

/// FilesystemStore writes every collection to `<path>/<db_name>/<collection>.jsonl`, one JSON
/// object per document.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(path: impl AsRef<Path>, db_name: &str) -> Self {
        Self {
            root: path.as_ref().join(db_name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_path(&self, collection: &CollectionHandle) -> PathBuf {
        self.root
            .join(format!("{}.{COLLECTION_EXTENSION}", collection.name()))
    }
}

fn check_collection_name(name: &str) -> Result<()> {
    if !is_valid_name(name) {
        return Err(Error::Store(format!("invalid collection name {name:?}")));
    }
    Ok(())
}

impl Store for FilesystemStore {
    async fn ping(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::Store(format!("failed to create {}: {e}", self.root.display()))
        })?;
        let marker = self.root.join(PING_FILE);
        fs::write(&marker, b"ping").await.map_err(|e| {
            Error::Store(format!("{} is not writable: {e}", self.root.display()))
        })?;
        fs::remove_file(&marker).await?;
        Ok(())
    }

    async fn collection(&self, name: &str) -> Result<CollectionHandle> {
        check_collection_name(name)?;
        fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::Store(format!("failed to create {}: {e}", self.root.display()))
        })?;
        Ok(CollectionHandle::new(name))
    }

    async fn reset(&self, collection: &CollectionHandle) -> Result<()> {
        let path = self.collection_path(collection);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Dropped collection file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Store(format!(
                "failed to drop collection {collection}: {e}"
            ))),
        }
    }

    async fn insert_many(
        &self,
        collection: &CollectionHandle,
        documents: Vec<Document>,
    ) -> Result<()> {
        let mut buf = Vec::new();
        for doc in &documents {
            serde_json::to_writer(&mut buf, doc).map_err(|e| {
                Error::Store(format!("failed to encode document for {collection}: {e}"))
            })?;
            buf.push(b'\n');
        }

        let path = self.collection_path(collection);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::Store(format!("failed to open {}: {e}", path.display())))?;
        file.write_all(&buf)
            .await
            .map_err(|e| Error::Store(format!("failed to write {}: {e}", path.display())))?;
        file.flush().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn doc(id: i64, name: &str) -> Document {
        let mut doc = Document::new("users");
        doc.push("name", json!(name));
        doc.push("id", json!(id));
        doc
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_insert_appends_ordered_objects() {
        let tmp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp_dir.path(), "airbyte");
        store.ping().await.unwrap();

        let users = store.collection("users").await.unwrap();
        store
            .insert_many(&users, vec![doc(1, "a"), doc(2, "b")])
            .await
            .unwrap();
        store.insert_many(&users, vec![doc(3, "c")]).await.unwrap();

        let path = tmp_dir.path().join("airbyte").join("users.jsonl");
        assert_eq!(store.collection_path(&users), path);
        let lines = read_lines(&path);
        assert_eq!(
            lines,
            vec![
                r#"{"name":"a","id":1}"#,
                r#"{"name":"b","id":2}"#,
                r#"{"name":"c","id":3}"#
            ]
        );
        let first: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first, json!({"id": 1, "name": "a"}));
    }

    #[tokio::test]
    async fn test_reset_drops_previous_content() {
        let tmp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp_dir.path(), "airbyte");
        let users = store.collection("users").await.unwrap();

        // resetting a collection that was never written is fine
        store.reset(&users).await.unwrap();

        store.insert_many(&users, vec![doc(1, "a")]).await.unwrap();
        store.reset(&users).await.unwrap();
        assert!(!store.collection_path(&users).exists());

        store.insert_many(&users, vec![doc(2, "b")]).await.unwrap();
        assert_eq!(
            read_lines(&store.collection_path(&users)),
            vec![r#"{"name":"b","id":2}"#]
        );
    }

    #[tokio::test]
    async fn test_invalid_collection_names() {
        let tmp_dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(tmp_dir.path(), "airbyte");
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(
                matches!(store.collection(name).await, Err(Error::Store(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_ping_unwritable_root() {
        let tmp_dir = TempDir::new().unwrap();
        let file = tmp_dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let store = FilesystemStore::new(&file, "airbyte");
        assert!(matches!(store.ping().await, Err(Error::Store(_))));
    }
}
