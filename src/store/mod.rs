//! Session persistence across the OAuth redirect boundary.
//!
//! The redirect may terminate the current process, so everything the callback
//! needs lives behind the [`Storage`] capability rather than in memory. Two
//! backends ship with the crate and one is chosen at startup:
//!
//! - [`MemoryStore`]: process-scoped, like browser session storage.
//! - [`FileStore`]: durable JSON file, like native persistent storage.
//!
//! Applications with their own keychain or database implement [`Storage`].

mod file;
mod memory;
mod session;
mod traits;

use std::path::PathBuf;
use std::sync::Arc;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use session::{ALL_KEYS, LOGIN_KEYS, SALT_SEED_KEY, SessionStore, SigningState};
pub use traits::{Mutation, Storage, StorageDyn, StorageError};

use crate::error::Error;

/// Storage strategy selected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    File(PathBuf),
}

impl StorageBackend {
    /// Instantiates the backend behind a [`SessionStore`].
    #[must_use]
    pub fn open(&self) -> SessionStore {
        let storage: Arc<dyn StorageDyn> = match self {
            Self::Memory => Arc::new(MemoryStore::new()),
            Self::File(path) => Arc::new(FileStore::new(path.clone())),
        };
        SessionStore::from_shared(storage)
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = Error;

    /// Parses `memory` or `file:<path>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "memory" => Ok(Self::Memory),
            other => match other.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Ok(Self::File(PathBuf::from(path))),
                _ => Err(Error::Config(format!(
                    "unknown storage backend {other:?} (expected `memory` or `file:<path>`)"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backends() {
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert_eq!(
            "file:/var/lib/wallet/session.json".parse::<StorageBackend>().unwrap(),
            StorageBackend::File("/var/lib/wallet/session.json".into())
        );
        assert!("file:".parse::<StorageBackend>().is_err());
        assert!("redis".parse::<StorageBackend>().is_err());
    }

    #[tokio::test]
    async fn test_file_backend_is_shared_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StorageBackend::File(dir.path().join("s.json"));

        let first = backend.open();
        let session = crate::keys::KeyManager::default()
            .create_session(1, "st".into(), None)
            .unwrap();
        first.save_login(&session).await.unwrap();

        let second = backend.open();
        assert_eq!(second.load_login().await.unwrap().nonce, session.nonce);
    }
}
