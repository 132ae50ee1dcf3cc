use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use super::traits::{Mutation, Storage, StorageError};

/// Durable store backed by a single JSON file.
///
/// Survives process restarts, which is what a native application needs when
/// the OAuth redirect relaunches it. Every write replaces the file through a
/// temporary sibling and a rename, so readers never observe a partial batch.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn modify(&self, batch: Vec<Mutation>) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        for mutation in batch {
            match mutation {
                Mutation::Set(key, value) => {
                    entries.insert(key, value);
                }
                Mutation::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        self.write_all(&entries).await
    }
}

impl Storage for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.modify(vec![Mutation::set(key, value)]).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.modify(vec![Mutation::delete(key)]).await
    }

    async fn apply(&self, batch: Vec<Mutation>) -> Result<(), StorageError> {
        self.modify(batch).await
    }
}
