use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use beacon_core::{QueueReason, TrackEvent};
use beacon_state::{StorageBackend, StoreKey};

use crate::error::DispatchError;

/// An event held in the persistent queue, tagged with why it was held.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// The held event.
    pub event: TrackEvent,
    /// Why the event was queued instead of delivered.
    pub reason: QueueReason,
    /// When the entry was appended.
    pub queued_at: DateTime<Utc>,
}

/// A FIFO queue of pending events mirrored to durable storage.
///
/// Insertion order is append order and is preserved until release. The
/// queue is bounded two ways: a count bound that evicts the oldest entries
/// when an append would exceed `max_size`, and an age bound applied before
/// every enqueue. Every mutation rewrites the persisted snapshot so the
/// queue survives process restarts.
pub struct PersistentQueue {
    backend: Arc<dyn StorageBackend>,
    entries: Mutex<VecDeque<QueueEntry>>,
    max_size: usize,
    max_age: Option<Duration>,
}

impl PersistentQueue {
    /// Load the queue from storage, starting empty when nothing is persisted
    /// or the persisted snapshot cannot be decoded.
    pub async fn restore(
        backend: Arc<dyn StorageBackend>,
        max_size: usize,
        max_age: Option<Duration>,
    ) -> Self {
        let entries = match backend.retrieve(&StoreKey::Queue).await {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<QueueEntry>>(&raw) {
                Ok(list) => {
                    debug!(count = list.len(), "restored persisted queue");
                    list.into()
                }
                Err(e) => {
                    warn!(error = %e, "persisted queue undecodable, starting empty");
                    VecDeque::new()
                }
            },
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "failed to read persisted queue, starting empty");
                VecDeque::new()
            }
        };

        Self {
            backend,
            entries: Mutex::new(entries),
            max_size,
            max_age,
        }
    }

    /// Append an event with the given queue reason.
    ///
    /// Entries older than the age bound are evicted first; then, if the
    /// append would exceed the count bound, the oldest entries are evicted
    /// until it fits.
    pub async fn append(
        &self,
        event: TrackEvent,
        reason: QueueReason,
    ) -> Result<(), DispatchError> {
        let entry = QueueEntry {
            event,
            reason,
            queued_at: Utc::now(),
        };

        {
            let mut entries = self.entries.lock();
            if let Some(max_age) = self.max_age {
                let cutoff = Utc::now() - max_age;
                evict_older_than(&mut entries, cutoff);
            }
            entries.push_back(entry);
            while entries.len() > self.max_size {
                if let Some(evicted) = entries.pop_front() {
                    warn!(
                        event_id = %evicted.event.id,
                        "queue over capacity, evicted oldest entry"
                    );
                }
            }
        }

        self.persist().await
    }

    /// Snapshot of the current entries, oldest first.
    #[must_use]
    pub fn peek(&self) -> Vec<QueueEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Atomically empty the queue and return all entries in append order.
    pub async fn dequeue_all(&self) -> Result<Vec<QueueEntry>, DispatchError> {
        let drained: Vec<QueueEntry> = {
            let mut entries = self.entries.lock();
            std::mem::take(&mut *entries).into()
        };
        if !drained.is_empty() {
            self.persist().await?;
        }
        Ok(drained)
    }

    /// Remove entries queued before `cutoff`. Returns how many were removed.
    pub async fn remove_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DispatchError> {
        let removed = {
            let mut entries = self.entries.lock();
            evict_older_than(&mut entries, cutoff)
        };
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Remove every entry. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, DispatchError> {
        let removed = {
            let mut entries = self.entries.lock();
            let n = entries.len();
            entries.clear();
            n
        };
        self.persist().await?;
        Ok(removed)
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Return `true` if the queue holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    async fn persist(&self) -> Result<(), DispatchError> {
        let snapshot: Vec<QueueEntry> = self.peek();
        let raw = serde_json::to_string(&snapshot)?;
        self.backend.save(&StoreKey::Queue, &raw).await?;
        Ok(())
    }
}

/// Drop entries queued before `cutoff` from the front of the deque.
/// Entries are in append order, so eviction stops at the first survivor.
fn evict_older_than(entries: &mut VecDeque<QueueEntry>, cutoff: DateTime<Utc>) -> usize {
    let mut removed = 0;
    while entries
        .front()
        .is_some_and(|entry| entry.queued_at < cutoff)
    {
        entries.pop_front();
        removed += 1;
    }
    removed
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    struct NullBackend;

    #[async_trait::async_trait]
    impl StorageBackend for NullBackend {
        async fn save(&self, _key: &StoreKey, _value: &str) -> Result<(), beacon_state::StateError> {
            Ok(())
        }

        async fn retrieve(
            &self,
            _key: &StoreKey,
        ) -> Result<Option<String>, beacon_state::StateError> {
            Ok(None)
        }

        async fn delete(&self, _key: &StoreKey) -> Result<bool, beacon_state::StateError> {
            Ok(false)
        }

        async fn can_write(&self) -> bool {
            true
        }
    }

    fn event(name: &str) -> TrackEvent {
        TrackEvent::new(name, Map::new())
    }

    async fn queue(max_size: usize) -> PersistentQueue {
        PersistentQueue::restore(Arc::new(NullBackend), max_size, None).await
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let queue = queue(10).await;
        for name in ["a", "b", "c"] {
            queue.append(event(name), QueueReason::Batching).await.unwrap();
        }

        let drained = queue.dequeue_all().await.unwrap();
        let names: Vec<&str> = drained.iter().map(|e| e.event.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn count_bound_evicts_oldest_first() {
        let queue = queue(3).await;
        for name in ["a", "b", "c", "d", "e"] {
            queue
                .append(event(name), QueueReason::Connectivity)
                .await
                .unwrap();
        }

        assert_eq!(queue.len(), 3);
        let names: Vec<String> = queue.peek().iter().map(|e| e.event.name.clone()).collect();
        assert_eq!(names, vec!["c", "d", "e"]);
    }

    #[tokio::test]
    async fn remove_older_than_cutoff() {
        let queue = queue(10).await;
        queue.append(event("old"), QueueReason::Batching).await.unwrap();
        queue.append(event("new"), QueueReason::Batching).await.unwrap();

        // Backdate the first entry.
        {
            let mut entries = queue.entries.lock();
            entries[0].queued_at = Utc::now() - Duration::days(10);
        }

        let removed = queue
            .remove_older_than(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek()[0].event.name, "new");
    }

    #[tokio::test]
    async fn age_eviction_runs_before_enqueue() {
        let queue = PersistentQueue::restore(Arc::new(NullBackend), 10, Some(Duration::days(7)))
            .await;
        queue.append(event("stale"), QueueReason::Batching).await.unwrap();
        {
            let mut entries = queue.entries.lock();
            entries[0].queued_at = Utc::now() - Duration::days(8);
        }

        queue.append(event("fresh"), QueueReason::Batching).await.unwrap();
        let names: Vec<String> = queue.peek().iter().map(|e| e.event.name.clone()).collect();
        assert_eq!(names, vec!["fresh"]);
    }

    #[tokio::test]
    async fn clear_empties_queue() {
        let queue = queue(10).await;
        queue.append(event("a"), QueueReason::Batching).await.unwrap();
        queue.append(event("b"), QueueReason::Batching).await.unwrap();

        assert_eq!(queue.clear().await.unwrap(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dequeue_all_on_empty_returns_empty() {
        let queue = queue(10).await;
        assert!(queue.dequeue_all().await.unwrap().is_empty());
    }
}
