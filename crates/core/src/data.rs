use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifetime class of a stored data item.
///
/// Governs both eviction and persistence: only `Forever` and `Until` items
/// round-trip across process restarts; `Session` and `UntilRestart` items are
/// seeded anew on each start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    /// Never expires; removed only by explicit delete.
    Forever,
    /// Cleared on process restart, never evicted by TTL.
    UntilRestart,
    /// Cleared when the active session ends.
    Session,
    /// Expires at the given instant.
    Until(DateTime<Utc>),
}

impl Expiry {
    /// Expiry instant `duration` from now.
    #[must_use]
    pub fn after(duration: Duration) -> Self {
        Self::Until(Utc::now() + duration)
    }

    /// Whether the item has passed its expiry instant. `Forever`,
    /// `UntilRestart`, and `Session` items never expire by time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Forever | Self::UntilRestart | Self::Session => false,
            Self::Until(deadline) => now >= *deadline,
        }
    }

    /// Whether items in this class are persisted across restarts.
    #[must_use]
    pub fn persists(&self) -> bool {
        matches!(self, Self::Forever | Self::Until(_))
    }
}

/// A single entry in the expiring data store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItem {
    /// The lookup key. Re-inserting a key replaces the prior entry.
    pub key: String,
    /// Stored value: string, number, boolean, or an array of the same.
    pub value: Value,
    /// Lifetime class and expiry instant.
    pub expiry: Expiry,
}

impl DataItem {
    /// Create a new data item.
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value, expiry: Expiry) -> Self {
        Self {
            key: key.into(),
            value,
            expiry,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn forever_and_restart_never_expire() {
        let far_future = Utc::now() + Duration::days(10_000);
        assert!(!Expiry::Forever.is_expired(far_future));
        assert!(!Expiry::UntilRestart.is_expired(far_future));
        assert!(!Expiry::Session.is_expired(far_future));
    }

    #[test]
    fn until_expires_at_deadline() {
        let now = Utc::now();
        let expiry = Expiry::Until(now + Duration::minutes(5));
        assert!(!expiry.is_expired(now));
        assert!(expiry.is_expired(now + Duration::minutes(5)));
        assert!(expiry.is_expired(now + Duration::minutes(6)));
    }

    #[test]
    fn persistence_classes() {
        assert!(Expiry::Forever.persists());
        assert!(Expiry::after(Duration::hours(1)).persists());
        assert!(!Expiry::UntilRestart.persists());
        assert!(!Expiry::Session.persists());
    }

    #[test]
    fn data_item_serde_roundtrip() {
        let item = DataItem::new("customer_id", json!("abc-42"), Expiry::Forever);
        let json = serde_json::to_string(&item).unwrap();
        let back: DataItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, "customer_id");
        assert_eq!(back.value, json!("abc-42"));
        assert_eq!(back.expiry, Expiry::Forever);
    }
}
