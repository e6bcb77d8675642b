use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use beacon_state::{StateError, StorageBackend, StoreKey};

/// In-memory [`StorageBackend`] backed by a [`DashMap`].
///
/// Suitable for tests and development. The writability flag can be toggled
/// to simulate storage exhaustion and exercise the pipeline's fail-open
/// path.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: DashMap<String, String>,
    read_only: AtomicBool,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle the writability probe. While read-only, `save` fails and
    /// `can_write` reports `false`.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Return `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save(&self, key: &StoreKey, value: &str) -> Result<(), StateError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StateError::NotWritable);
        }
        self.data.insert(key.as_str().to_owned(), value.to_owned());
        Ok(())
    }

    async fn retrieve(&self, key: &StoreKey) -> Result<Option<String>, StateError> {
        Ok(self.data.get(key.as_str()).map(|entry| entry.clone()))
    }

    async fn delete(&self, key: &StoreKey) -> Result<bool, StateError> {
        Ok(self.data.remove(key.as_str()).is_some())
    }

    async fn can_write(&self) -> bool {
        !self.read_only.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_retrieve() {
        let backend = MemoryBackend::new();
        backend.save(&StoreKey::EventData, "{}").await.unwrap();
        let value = backend.retrieve(&StoreKey::EventData).await.unwrap();
        assert_eq!(value.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn retrieve_missing_returns_none() {
        let backend = MemoryBackend::new();
        assert!(backend.retrieve(&StoreKey::Queue).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let backend = MemoryBackend::new();
        backend.save(&StoreKey::Consent, "x").await.unwrap();
        assert!(backend.delete(&StoreKey::Consent).await.unwrap());
        assert!(!backend.delete(&StoreKey::Consent).await.unwrap());
    }

    #[tokio::test]
    async fn save_overwrites() {
        let backend = MemoryBackend::new();
        backend.save(&StoreKey::Queue, "a").await.unwrap();
        backend.save(&StoreKey::Queue, "b").await.unwrap();
        let value = backend.retrieve(&StoreKey::Queue).await.unwrap();
        assert_eq!(value.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn read_only_blocks_writes() {
        let backend = MemoryBackend::new();
        backend.set_read_only(true);
        assert!(!backend.can_write().await);
        let err = backend.save(&StoreKey::Queue, "x").await.unwrap_err();
        assert!(matches!(err, StateError::NotWritable));

        backend.set_read_only(false);
        assert!(backend.can_write().await);
        backend.save(&StoreKey::Queue, "x").await.unwrap();
    }
}
