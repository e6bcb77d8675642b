use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking pipeline outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Total events accepted by `track`.
    pub tracked: AtomicU64,
    /// Events appended to the persistent queue.
    pub queued: AtomicU64,
    /// Events discarded by a validator.
    pub dropped: AtomicU64,
    /// Queue purges forced by a validator.
    pub purged: AtomicU64,
    /// Events handed to dispatchers immediately.
    pub delivered: AtomicU64,
    /// Per-dispatcher delivery attempts that failed.
    pub delivery_failures: AtomicU64,
    /// Queue releases that produced at least one payload.
    pub released: AtomicU64,
}

impl DispatchMetrics {
    /// Increment the tracked counter.
    pub fn increment_tracked(&self) {
        self.tracked.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the queued counter.
    pub fn increment_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the dropped counter.
    pub fn increment_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the purged counter.
    pub fn increment_purged(&self) {
        self.purged.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the delivered counter.
    pub fn increment_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the delivery-failure counter.
    pub fn increment_delivery_failures(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the released counter.
    pub fn increment_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture a point-in-time view of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tracked: self.tracked.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tracked: u64,
    pub queued: u64,
    pub dropped: u64,
    pub purged: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
    pub released: u64,
}
