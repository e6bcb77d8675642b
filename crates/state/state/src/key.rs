use serde::{Deserialize, Serialize};

/// Logical store identifier. Each key maps to one persisted map file; no
/// shared schema is required across stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKey {
    /// The expiring event-data store (persistent classes only).
    EventData,
    /// Consent preferences.
    Consent,
    /// The persistent dispatch queue.
    Queue,
    /// The hosted enrichment cache.
    HostedCache,
    Custom(String),
}

impl StoreKey {
    /// Return the string form used as the backend storage key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::EventData => "event_data",
            Self::Consent => "consent_preferences",
            Self::Queue => "dispatch_queue",
            Self::HostedCache => "hosted_cache",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_strings() {
        assert_eq!(StoreKey::EventData.as_str(), "event_data");
        assert_eq!(StoreKey::Consent.as_str(), "consent_preferences");
        assert_eq!(StoreKey::Queue.as_str(), "dispatch_queue");
        assert_eq!(StoreKey::HostedCache.as_str(), "hosted_cache");
        assert_eq!(StoreKey::Custom("visitor".into()).as_str(), "visitor");
    }
}
