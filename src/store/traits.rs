use std::future::Future;
use std::pin::Pin;

/// Boxed error returned by storage backends.
pub type StorageError = Box<dyn std::error::Error + Send + Sync>;

/// One change in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Set(String, String),
    Delete(String),
}

impl Mutation {
    pub fn set(key: &str, value: impl Into<String>) -> Self {
        Self::Set(key.to_owned(), value.into())
    }

    pub fn delete(key: &str) -> Self {
        Self::Delete(key.to_owned())
    }
}

/// Key-string-to-string persistence capability, scoped to one application session.
///
/// Implementations must apply [`Storage::apply`] atomically: after it returns,
/// either every mutation in the batch is visible or none is.
///
/// # Example
///
/// ```rust,ignore
/// impl Storage for KeychainStore {
///     async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
///         Ok(self.keychain.read(key)?)
///     }
///     // ...
/// }
/// ```
pub trait Storage: Send + Sync + 'static {
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;

    fn set(
        &self,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Applies every mutation in order, atomically.
    fn apply(
        &self,
        batch: Vec<Mutation>,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe wrapper for [`Storage`] (needed for `Arc<dyn>` backend selection).
pub trait StorageDyn: Send + Sync {
    fn get_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>>;

    fn set_dyn<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;

    fn delete_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;

    fn apply_dyn(&self, batch: Vec<Mutation>) -> BoxFuture<'_, Result<(), StorageError>>;
}

impl<T: Storage> StorageDyn for T {
    fn get_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>, StorageError>> {
        Box::pin(self.get(key))
    }

    fn set_dyn<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.set(key, value))
    }

    fn delete_dyn<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.delete(key))
    }

    fn apply_dyn(&self, batch: Vec<Mutation>) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(self.apply(batch))
    }
}
