use std::collections::HashMap;

use tokio::sync::RwLock;

use super::traits::{Mutation, Storage, StorageError};

/// Process-scoped store; contents vanish when the process exits.
///
/// Counterpart of browser session storage: suitable when the redirect returns
/// into the same running process (e.g. a loopback callback server).
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Storage for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn apply(&self, batch: Vec<Mutation>) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
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
        Ok(())
    }
}
