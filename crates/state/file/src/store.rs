use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use beacon_state::{StateError, StorageBackend, StoreKey};

/// File-backed [`StorageBackend`]: one file per logical store under a root
/// directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write never leaves a truncated store file behind.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Create a backend rooted at `root`. The directory is created on first
    /// write if it does not exist.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory holding the store files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &StoreKey) -> PathBuf {
        self.root.join(format!("{}.json", key.as_str()))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn save(&self, key: &StoreKey, value: &str) -> Result<(), StateError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        let target = self.path_for(key);
        let tmp = target.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn retrieve(&self, key: &StoreKey) -> Result<Option<String>, StateError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Backend(e.to_string())),
        }
    }

    async fn delete(&self, key: &StoreKey) -> Result<bool, StateError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::Backend(e.to_string())),
        }
    }

    async fn can_write(&self) -> bool {
        // Probe by writing and removing a marker file.
        if tokio::fs::create_dir_all(&self.root).await.is_err() {
            return false;
        }
        let probe = self.root.join(".write_probe");
        match tokio::fs::write(&probe, b"probe").await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_file(&probe).await {
                    warn!(error = %e, "failed to remove write probe");
                }
                true
            }
            Err(_) => false,
        }
    }
}
