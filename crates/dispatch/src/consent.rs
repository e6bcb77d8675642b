use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use beacon_core::{
    ConsentCategory, ConsentPolicy, ConsentPreferences, ConsentStatus, TrackEvent,
};
use beacon_state::{StorageBackend, StoreKey};

use crate::error::DispatchError;
use crate::validator::{Collector, DispatchValidator, QueueCheck};

/// Event emitted on every consent change so web bridges can mirror the
/// native selection into their cookie.
pub const CONSENT_SYNC_EVENT: &str = "update_consent_cookie";

const GRANT_FULL_EVENT: &str = "grant_full_consent";
const GRANT_PARTIAL_EVENT: &str = "grant_partial_consent";
const DECLINE_EVENT: &str = "decline_consent";

/// Gates the pipeline on the user's tracking consent.
///
/// While consent is unknown, events are held in the queue; once the user
/// declines, events are dropped and the queue is purged. The gate also acts
/// as a collector so every outgoing event carries the consent fields for the
/// configured policy.
///
/// Consent changes produce auditing events that flow back through the
/// pipeline. Those events are marked as audit traffic and exempted from the
/// gate itself, so a decline can still be reported.
pub struct ConsentGate {
    backend: Arc<dyn StorageBackend>,
    policy: ConsentPolicy,
    consent_logging: bool,
    prefs: RwLock<ConsentPreferences>,
}

impl ConsentGate {
    /// Load persisted preferences from storage. Starts at `Unknown` when
    /// nothing is persisted or the snapshot cannot be decoded.
    pub async fn restore(
        backend: Arc<dyn StorageBackend>,
        policy: ConsentPolicy,
        consent_logging: bool,
    ) -> Self {
        let prefs = match backend.retrieve(&StoreKey::Consent).await {
            Ok(Some(raw)) => match serde_json::from_str::<ConsentPreferences>(&raw) {
                Ok(prefs) => {
                    debug!(status = %prefs.status, "restored consent preferences");
                    prefs
                }
                Err(e) => {
                    warn!(error = %e, "persisted consent undecodable, starting unknown");
                    ConsentPreferences::default()
                }
            },
            Ok(None) => ConsentPreferences::default(),
            Err(e) => {
                warn!(error = %e, "failed to read persisted consent, starting unknown");
                ConsentPreferences::default()
            }
        };

        Self {
            backend,
            policy,
            consent_logging,
            prefs: RwLock::new(prefs),
        }
    }

    /// Current consent status.
    #[must_use]
    pub fn status(&self) -> ConsentStatus {
        self.prefs.read().status
    }

    /// Current preferences snapshot.
    #[must_use]
    pub fn preferences(&self) -> ConsentPreferences {
        self.prefs.read().clone()
    }

    /// The granted category set. Empty unless consented.
    #[must_use]
    pub fn categories(&self) -> BTreeSet<ConsentCategory> {
        self.prefs.read().categories.clone()
    }

    /// Set the consent status. `Consented` without an explicit category
    /// selection grants the full category set; `NotConsented` and `Unknown`
    /// clear it.
    ///
    /// Returns the auditing events the change produced. The caller is
    /// expected to feed them back through the pipeline.
    pub async fn set_status(
        &self,
        status: ConsentStatus,
    ) -> Result<Vec<TrackEvent>, DispatchError> {
        let categories = match status {
            ConsentStatus::Consented => ConsentCategory::all(),
            ConsentStatus::NotConsented | ConsentStatus::Unknown => BTreeSet::new(),
        };
        self.apply(ConsentPreferences { status, categories }).await
    }

    /// Grant consent for an explicit category selection. An empty selection
    /// is treated as a decline.
    pub async fn set_categories(
        &self,
        categories: BTreeSet<ConsentCategory>,
    ) -> Result<Vec<TrackEvent>, DispatchError> {
        let status = if categories.is_empty() {
            ConsentStatus::NotConsented
        } else {
            ConsentStatus::Consented
        };
        self.apply(ConsentPreferences { status, categories }).await
    }

    /// Forget the stored selection and return to `Unknown`. Emits no
    /// auditing events.
    pub async fn reset(&self) -> Result<(), DispatchError> {
        *self.prefs.write() = ConsentPreferences::default();
        self.backend.delete(&StoreKey::Consent).await?;
        info!("consent preferences reset");
        Ok(())
    }

    /// The consent fields merged into outgoing events. Under GDPR the
    /// granted categories are reported individually; under CCPA only the
    /// binary opt-out is.
    #[must_use]
    pub fn merge_fields(&self) -> Map<String, Value> {
        let prefs = self.prefs.read();
        let mut fields = Map::new();
        fields.insert("consent_policy".into(), json!(self.policy.as_str()));
        fields.insert("consent_status".into(), json!(prefs.status.to_string()));
        match self.policy {
            ConsentPolicy::Gdpr => {
                fields.insert(
                    "consent_categories".into(),
                    serde_json::to_value(&prefs.categories).unwrap_or_else(|_| json!([])),
                );
            }
            ConsentPolicy::Ccpa => {
                fields.insert(
                    "do_not_sell".into(),
                    json!(prefs.status == ConsentStatus::NotConsented),
                );
            }
        }
        fields
    }

    async fn apply(
        &self,
        next: ConsentPreferences,
    ) -> Result<Vec<TrackEvent>, DispatchError> {
        {
            let mut prefs = self.prefs.write();
            if *prefs == next {
                return Ok(Vec::new());
            }
            *prefs = next.clone();
        }

        let raw = serde_json::to_string(&next)?;
        self.backend.save(&StoreKey::Consent, &raw).await?;
        info!(status = %next.status, categories = next.categories.len(), "consent updated");

        let mut events = Vec::new();
        if self.consent_logging
            && let Some(name) = audit_event_name(&next)
        {
            events.push(TrackEvent::new(name, self.merge_fields()).with_audit());
        }
        events.push(TrackEvent::new(CONSENT_SYNC_EVENT, self.merge_fields()).with_audit());
        Ok(events)
    }
}

fn audit_event_name(prefs: &ConsentPreferences) -> Option<&'static str> {
    match prefs.status {
        ConsentStatus::Consented if prefs.is_full_consent() => Some(GRANT_FULL_EVENT),
        ConsentStatus::Consented => Some(GRANT_PARTIAL_EVENT),
        ConsentStatus::NotConsented => Some(DECLINE_EVENT),
        ConsentStatus::Unknown => None,
    }
}

#[async_trait]
impl DispatchValidator for ConsentGate {
    fn name(&self) -> &str {
        "consent-gate"
    }

    async fn should_queue(&self, event: &TrackEvent) -> QueueCheck {
        if event.audit {
            return QueueCheck::pass();
        }
        match self.status() {
            ConsentStatus::Unknown => QueueCheck::queue(
                beacon_core::QueueReason::PendingConsent,
                Some(self.merge_fields()),
            ),
            ConsentStatus::Consented | ConsentStatus::NotConsented => QueueCheck::pass(),
        }
    }

    async fn should_drop(&self, event: &TrackEvent) -> bool {
        !event.audit && self.status() == ConsentStatus::NotConsented
    }

    async fn should_purge(&self, event: &TrackEvent) -> bool {
        !event.audit && self.status() == ConsentStatus::NotConsented
    }
}

#[async_trait]
impl Collector for ConsentGate {
    fn name(&self) -> &str {
        "consent"
    }

    async fn data(&self) -> Option<Map<String, Value>> {
        Some(self.merge_fields())
    }
}
