use async_trait::async_trait;

use crate::error::StateError;
use crate::key::StoreKey;

/// Trait for the key-value persistence backend underneath the pipeline.
///
/// Each logical store serializes its own entity list to a string and saves
/// it under its [`StoreKey`]. Implementations must be `Send + Sync` and safe
/// for concurrent access.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Persist `value` under `key`, overwriting any previous value.
    async fn save(&self, key: &StoreKey, value: &str) -> Result<(), StateError>;

    /// Load the value stored under `key`. Returns `None` if absent.
    async fn retrieve(&self, key: &StoreKey) -> Result<Option<String>, StateError>;

    /// Delete the value stored under `key`. Returns `true` if it existed.
    async fn delete(&self, key: &StoreKey) -> Result<bool, StateError>;

    /// Writability probe. When this returns `false` the pipeline fails open:
    /// it bypasses queueing and attempts immediate delivery rather than
    /// silently losing data.
    async fn can_write(&self) -> bool;
}
