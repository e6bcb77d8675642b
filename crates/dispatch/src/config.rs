use beacon_core::ConsentPolicy;

/// Event names that always bypass batching, regardless of configuration.
///
/// Consent auditing and bridge-sync events must reach the backend promptly
/// so the reported consent state never lags the decision that produced it;
/// remote-api events carry command responses that are useless when stale.
pub const BYPASS_EVENT_NAMES: &[&str] = &[
    "update_consent_cookie",
    "grant_full_consent",
    "grant_partial_consent",
    "decline_consent",
    "remote_api_event",
];

/// Configuration for the [`DispatchManager`](crate::DispatchManager).
///
/// Degenerate values are treated as "feature disabled", not as errors: when
/// batching is off or any of the three thresholds is ≤ 1, the manager
/// degrades to immediate-delivery behavior.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Whether events are held for batched delivery at all.
    pub batching_enabled: bool,
    /// Queue length that triggers an automatic release.
    pub events_before_auto_dispatch: usize,
    /// Maximum number of events delivered in one batch chunk.
    pub max_dispatch_size: usize,
    /// Upper bound on queued entries; the oldest are evicted beyond it.
    pub max_queue_size: usize,
    /// Queued entries older than this many days are evicted before every
    /// enqueue. Zero disables age-based eviction.
    pub batch_expiration_days: i64,
    /// When enabled, events are held while the device is in low-power mode.
    pub battery_saver: bool,
    /// Additional event names that bypass batching, extending
    /// [`BYPASS_EVENT_NAMES`].
    pub bypass_event_names: Vec<String>,
    /// Inactivity gap after which a new session id is generated.
    pub minutes_between_session_id: i64,
    /// Window within which consecutive track calls count toward the
    /// session-bootstrap heuristic.
    pub seconds_between_track_events: i64,
    /// Consent reporting policy.
    pub consent_policy: ConsentPolicy,
    /// Whether consent changes emit auditing events.
    pub consent_logging: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batching_enabled: true,
            events_before_auto_dispatch: 10,
            max_dispatch_size: 10,
            max_queue_size: 40,
            batch_expiration_days: 7,
            battery_saver: false,
            bypass_event_names: Vec::new(),
            minutes_between_session_id: 30,
            seconds_between_track_events: 30,
            consent_policy: ConsentPolicy::default(),
            consent_logging: false,
        }
    }
}

impl DispatchConfig {
    /// Whether the batching policy is in effect at all. Any threshold ≤ 1
    /// disables batching entirely.
    #[must_use]
    pub fn batching_active(&self) -> bool {
        self.batching_enabled
            && self.events_before_auto_dispatch > 1
            && self.max_dispatch_size > 1
            && self.max_queue_size > 1
    }

    /// Whether `name` is in the bypass-key set (fixed critical names plus
    /// the configured extension list).
    #[must_use]
    pub fn is_bypass_event(&self, name: &str) -> bool {
        BYPASS_EVENT_NAMES.contains(&name) || self.bypass_event_names.iter().any(|n| n == name)
    }
}
