use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use beacon_core::{DataItem, Expiry};
use beacon_state::{StorageBackend, StoreKey};

use crate::error::DispatchError;

/// Key-value store where each entry carries an expiration class.
///
/// Last write wins: re-inserting a key replaces the prior entry's value and
/// expiry. Reads filter out expired items; expired items are lazily purged
/// on the next write, not proactively swept. Only `Forever` and `Until`
/// items round-trip through persistence; `Session` and `UntilRestart` items
/// are seeded anew on each process start.
pub struct ExpiringDataStore {
    backend: Arc<dyn StorageBackend>,
    items: Mutex<HashMap<String, DataItem>>,
}

impl ExpiringDataStore {
    /// Load persistent items from storage. Starts empty when nothing is
    /// persisted or the snapshot cannot be decoded.
    pub async fn restore(backend: Arc<dyn StorageBackend>) -> Self {
        let items = match backend.retrieve(&StoreKey::EventData).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<DataItem>>(&raw) {
                Ok(list) => {
                    debug!(count = list.len(), "restored persisted event data");
                    list.into_iter()
                        .filter(|item| item.expiry.persists())
                        .map(|item| (item.key.clone(), item))
                        .collect()
                }
                Err(e) => {
                    warn!(error = %e, "persisted event data undecodable, starting empty");
                    HashMap::new()
                }
            },
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, "failed to read persisted event data, starting empty");
                HashMap::new()
            }
        };

        Self {
            backend,
            items: Mutex::new(items),
        }
    }

    /// Insert every entry of `data` under the given expiration class.
    pub async fn add(&self, data: Map<String, Value>, expiry: Expiry) -> Result<(), DispatchError> {
        {
            let mut items = self.items.lock();
            purge_expired(&mut items);
            for (key, value) in data {
                items.insert(key.clone(), DataItem::new(key, value, expiry));
            }
        }
        self.persist().await
    }

    /// Insert a single key under the given expiration class.
    pub async fn add_value(
        &self,
        key: impl Into<String>,
        value: Value,
        expiry: Expiry,
    ) -> Result<(), DispatchError> {
        let key = key.into();
        {
            let mut items = self.items.lock();
            purge_expired(&mut items);
            items.insert(key.clone(), DataItem::new(key, value, expiry));
        }
        self.persist().await
    }

    /// Delete the given keys. Missing keys are ignored.
    pub async fn delete(&self, keys: &[&str]) -> Result<(), DispatchError> {
        {
            let mut items = self.items.lock();
            purge_expired(&mut items);
            for key in keys {
                items.remove(*key);
            }
        }
        self.persist().await
    }

    /// Delete every item, persisted state included. Calling this on an
    /// already-empty store is a no-op.
    pub async fn delete_all(&self) -> Result<(), DispatchError> {
        self.items.lock().clear();
        self.backend.delete(&StoreKey::EventData).await?;
        Ok(())
    }

    /// Clear all `Session`-class items. Used when the active session ends.
    pub async fn expire_session_data(&self) -> Result<(), DispatchError> {
        self.items
            .lock()
            .retain(|_, item| item.expiry != Expiry::Session);
        self.persist().await
    }

    /// All live (non-expired) entries as a key-value mapping.
    #[must_use]
    pub fn all_data(&self) -> Map<String, Value> {
        let now = Utc::now();
        self.items
            .lock()
            .values()
            .filter(|item| !item.expiry.is_expired(now))
            .map(|item| (item.key.clone(), item.value.clone()))
            .collect()
    }

    /// Look up a single live value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let items = self.items.lock();
        let item = items.get(key)?;
        if item.expiry.is_expired(Utc::now()) {
            return None;
        }
        Some(item.value.clone())
    }

    /// Whether a live value exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    async fn persist(&self) -> Result<(), DispatchError> {
        let snapshot: Vec<DataItem> = {
            let items = self.items.lock();
            items
                .values()
                .filter(|item| item.expiry.persists())
                .cloned()
                .collect()
        };
        let raw = serde_json::to_string(&snapshot)?;
        self.backend.save(&StoreKey::EventData, &raw).await?;
        Ok(())
    }
}

fn purge_expired(items: &mut HashMap<String, DataItem>) {
    let now = Utc::now();
    items.retain(|_, item| !item.expiry.is_expired(now));
}
