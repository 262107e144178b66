use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read `{key}`: {source}")]
    Read {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write `{key}`: {source}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("store document {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Async string store addressed by namespaced keys.
///
/// Implementations must make a single `set_item`/`remove_item` atomic with
/// respect to readers of the same key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set_item(&self, key: &str, value: String) -> StoreResult<()>;
    async fn remove_item(&self, key: &str) -> StoreResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    namespace: String,
    key: String,
}

impl StorageKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.lock().clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> StoreResult<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    schema_version: u32,
    values: BTreeMap<String, String>,
}

/// Store persisted as one JSON document on disk.
///
/// Every mutation rewrites the document through a temporary file and a rename
/// so readers never observe a half-written file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn in_dir(dir: impl AsRef<Path>, file_name: &str) -> Self {
        Self::new(dir.as_ref().join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_values(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    key: key.to_string(),
                    source,
                });
            }
        };

        let doc: StoreFile = serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        Ok(doc.values)
    }

    /// Loads the document for a mutation. A corrupt document is moved aside
    /// to `<file>.corrupt` and the mutation starts from an empty map.
    async fn load_for_write(&self, key: &str) -> StoreResult<BTreeMap<String, String>> {
        match self.load_values(key).await {
            Err(StoreError::Corrupt { path, source }) => {
                let aside = self.corrupt_path();
                warn!(
                    path = %path.display(),
                    aside = %aside.display(),
                    error = %source,
                    "store document is corrupt, moving it aside"
                );
                tokio::fs::rename(&path, &aside)
                    .await
                    .map_err(|source| StoreError::Write {
                        key: key.to_string(),
                        source,
                    })?;
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn corrupt_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        PathBuf::from(name)
    }

    async fn save_values(&self, key: &str, values: BTreeMap<String, String>) -> StoreResult<()> {
        let write_err = |source: io::Error| StoreError::Write {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let doc = StoreFile {
            schema_version: SCHEMA_VERSION,
            values,
        };
        let text = serde_json::to_string(&doc).map_err(|err| write_err(err.into()))?;

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, text)
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(write_err)?;

        debug!(path = %self.path.display(), key, "store document persisted");
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock().await;
        let mut values = self.load_values(key).await?;
        Ok(values.remove(key))
    }

    async fn set_item(&self, key: &str, value: String) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load_for_write(key).await?;
        values.insert(key.to_string(), value);
        self.save_values(key, values).await
    }

    async fn remove_item(&self, key: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load_for_write(key).await?;
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.save_values(key, values).await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn storage_key_renders_namespace_prefix() {
        let key = StorageKey::new("@NoteApp", "notes");
        assert_eq!(key.to_string(), "@NoteApp:notes");
        assert_eq!(key.namespace(), "@NoteApp");
        assert_eq!(key.key(), "notes");
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get_item("a").await.expect("get"), None);

        store.set_item("a", "1".to_string()).await.expect("set");
        store.set_item("a", "2".to_string()).await.expect("overwrite");
        assert_eq!(store.get_item("a").await.expect("get").as_deref(), Some("2"));

        store.remove_item("a").await.expect("remove");
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::in_dir(dir.path(), "store.json");
        store
            .set_item("@NoteApp:notes", "[]".to_string())
            .await
            .expect("set");
        store
            .set_item("@NoteApp:draft", "{}".to_string())
            .await
            .expect("set draft");

        let reopened = FileStore::in_dir(dir.path(), "store.json");
        assert_eq!(
            reopened.get_item("@NoteApp:notes").await.expect("get").as_deref(),
            Some("[]")
        );

        reopened.remove_item("@NoteApp:notes").await.expect("remove");
        assert_eq!(reopened.get_item("@NoteApp:notes").await.expect("get"), None);
        assert_eq!(
            reopened.get_item("@NoteApp:draft").await.expect("get").as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn file_store_missing_document_reads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = FileStore::in_dir(dir.path().join("nested"), "store.json");
        assert_eq!(store.get_item("k").await.expect("get"), None);
        store.remove_item("k").await.expect("remove on empty store");
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_document() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").expect("write garbage");

        let store = FileStore::new(&path);
        let err = store.get_item("k").await.expect_err("must fail");
        assert!(matches!(err, StoreError::Corrupt { .. }), "unexpected: {err}");
    }

    #[tokio::test]
    async fn file_store_recovers_from_corrupt_document_on_write() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{truncated").expect("write garbage");

        let store = FileStore::new(&path);
        store
            .set_item("@NoteApp:notes", "[]".to_string())
            .await
            .expect("set after corruption");
        assert_eq!(
            store.get_item("@NoteApp:notes").await.expect("get").as_deref(),
            Some("[]")
        );

        let aside = dir.path().join("store.json.corrupt");
        assert_eq!(
            std::fs::read_to_string(&aside).expect("corrupt copy kept"),
            "{truncated"
        );
    }

    #[tokio::test]
    async fn file_store_remove_clears_corrupt_document() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").expect("write garbage");

        let store = FileStore::new(&path);
        store.remove_item("k").await.expect("remove after corruption");
        assert_eq!(store.get_item("k").await.expect("get"), None);
        assert!(dir.path().join("store.json.corrupt").exists());
    }
}
