use serde::{Deserialize, Serialize};

/// Why an event was held in the persistent queue instead of delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueReason {
    /// Consent status is still unknown.
    PendingConsent,
    /// No viable network connectivity.
    Connectivity,
    /// Battery saver active and the device is in low-power mode.
    InsufficientBattery,
    /// Held for batched delivery.
    Batching,
    /// No delivery transport registered yet.
    DispatchersNotReady,
    /// Waiting for hosted enrichment data to be fetched.
    AwaitingEnrichment,
    /// Queued by an external validator with its own reason.
    Custom(String),
}

impl QueueReason {
    /// Return the canonical string form of the reason.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PendingConsent => "pending-consent",
            Self::Connectivity => "connectivity",
            Self::InsufficientBattery => "insufficient-battery",
            Self::Batching => "batching-enabled",
            Self::DispatchersNotReady => "dispatchers-not-ready",
            Self::AwaitingEnrichment => "awaiting-enrichment",
            Self::Custom(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for QueueReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-dispatcher result of a delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Name of the dispatcher that received the payload.
    pub dispatcher: String,
    /// Whether the dispatcher reported success.
    pub success: bool,
    /// Error description when the attempt failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal outcome of tracking one event through the dispatch pipeline.
///
/// Exactly one of these occurs per tracked event; the variants are mutually
/// exclusive. A `Queued` event reports its later delivery per release
/// attempt, not through a second outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchOutcome {
    /// Event was appended to the persistent queue.
    Queued { reason: QueueReason },
    /// Event was discarded entirely (not queued, not sent).
    Dropped { validator: String },
    /// The entire persistent queue was cleared, this event included.
    Purged {
        /// Validator that forced the purge.
        validator: String,
        /// Number of previously queued entries that were wiped.
        purged: usize,
    },
    /// Event was handed to every registered dispatcher.
    Delivered { results: Vec<DeliveryResult> },
}

impl DispatchOutcome {
    /// Short tag for logging and metrics.
    #[must_use]
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Dropped { .. } => "dropped",
            Self::Purged { .. } => "purged",
            Self::Delivered { .. } => "delivered",
        }
    }
}
