use async_trait::async_trait;
use serde_json::{Map, Value};

use beacon_core::{QueueReason, TrackEvent};

/// A validator's answer to "should this event be queued?".
///
/// `queue` and `merge` are independent: a validator may contribute merge
/// data without voting to queue (e.g. a cache hit returning enrichment
/// fields, or a negative-cache entry attaching an error marker).
#[derive(Debug, Default)]
pub struct QueueCheck {
    /// When set, the event must be queued with this reason.
    pub queue: Option<QueueReason>,
    /// Data to fold into the event before it proceeds.
    pub merge: Option<Map<String, Value>>,
}

impl QueueCheck {
    /// Neither queue nor merge.
    #[must_use]
    pub fn pass() -> Self {
        Self::default()
    }

    /// Queue with the given reason, optionally merging data first.
    #[must_use]
    pub fn queue(reason: QueueReason, merge: Option<Map<String, Value>>) -> Self {
        Self {
            queue: Some(reason),
            merge,
        }
    }

    /// Contribute merge data without voting to queue.
    #[must_use]
    pub fn merge_only(merge: Map<String, Value>) -> Self {
        Self {
            queue: None,
            merge: Some(merge),
        }
    }
}

/// Capability that can force-queue, drop, or purge an event.
///
/// Multiple validators are consulted per event; any "yes" on queue, drop, or
/// purge is decisive. Implementations must never mutate shared pipeline
/// state; they only inspect the event and return verdicts and merge data.
#[async_trait]
pub trait DispatchValidator: Send + Sync {
    /// Returns the unique name of this validator, used in outcomes and logs.
    fn name(&self) -> &str;

    /// Whether the event should be held in the persistent queue.
    async fn should_queue(&self, event: &TrackEvent) -> QueueCheck;

    /// Whether the event should be discarded entirely.
    async fn should_drop(&self, event: &TrackEvent) -> bool {
        let _ = event;
        false
    }

    /// Whether the entire persistent queue should be cleared.
    async fn should_purge(&self, event: &TrackEvent) -> bool {
        let _ = event;
        false
    }
}

/// Capability notified immediately before delivery, for audit and
/// observability only. Must not block or alter the event.
#[async_trait]
pub trait DispatchListener: Send + Sync {
    /// Called once per event, after merge and immediately before the event
    /// is handed to dispatchers.
    async fn will_deliver(&self, event: &TrackEvent);
}

/// Capability supplying contextual fields merged into every outgoing event
/// (device/app metadata, crash info, location).
#[async_trait]
pub trait Collector: Send + Sync {
    /// Returns the unique name of this collector.
    fn name(&self) -> &str;

    /// Contextual data to merge, or `None` when nothing is available.
    async fn data(&self) -> Option<Map<String, Value>>;
}
