use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use beacon_core::{
    ConsentCategory, ConsentStatus, DeliveryResult, DispatchOutcome, EventBatch, QueueReason,
    TrackEvent,
};
use beacon_state::StorageBackend;
use beacon_transport::{DispatcherRegistry, DynDispatcher};

use crate::config::DispatchConfig;
use crate::consent::ConsentGate;
use crate::data_store::ExpiringDataStore;
use crate::error::DispatchError;
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::probes::{BATTERY_UNKNOWN, ConnectivityProbe, PowerProbe};
use crate::queue::{PersistentQueue, QueueEntry};
use crate::session::SessionTracker;
use crate::validator::{Collector, DispatchListener, DispatchValidator};

/// Rebuilds the dispatcher registry, typically after connectivity returns.
pub type DispatcherFactory = Box<dyn Fn() -> DispatcherRegistry + Send + Sync>;

/// Orchestrates the event pipeline: consent, validation, queueing, session
/// context, enrichment, and fan-out delivery.
///
/// Every tracked event resolves to exactly one [`DispatchOutcome`]. The
/// pipeline is serialized behind an internal async lock, so decisions about
/// one event never interleave with another's; probes and validators may be
/// consulted concurrently by background work, but queue and session
/// mutations happen single-file.
pub struct DispatchManager {
    pub(crate) config: DispatchConfig,
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) queue: PersistentQueue,
    pub(crate) session: SessionTracker,
    pub(crate) consent: Arc<ConsentGate>,
    pub(crate) validators: Vec<Arc<dyn DispatchValidator>>,
    pub(crate) listeners: Vec<Arc<dyn DispatchListener>>,
    pub(crate) collectors: Vec<Arc<dyn Collector>>,
    pub(crate) registry: RwLock<DispatcherRegistry>,
    pub(crate) dispatcher_factory: Option<DispatcherFactory>,
    pub(crate) shadow: Option<Arc<dyn DynDispatcher>>,
    pub(crate) connectivity: Arc<dyn ConnectivityProbe>,
    pub(crate) power: Arc<dyn PowerProbe>,
    pub(crate) metrics: DispatchMetrics,
    pub(crate) pipeline: tokio::sync::Mutex<()>,
}

impl DispatchManager {
    /// Track an event by name and payload.
    pub async fn track(
        &self,
        name: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.track_event(TrackEvent::new(name, payload)).await
    }

    /// Track a pre-built event through the full decision pipeline.
    #[tracing::instrument(skip_all, fields(event = %event.name, id = %event.id))]
    pub async fn track_event(
        &self,
        event: TrackEvent,
    ) -> Result<DispatchOutcome, DispatchError> {
        let _guard = self.pipeline.lock().await;
        self.process(event).await
    }

    async fn process(&self, event: TrackEvent) -> Result<DispatchOutcome, DispatchError> {
        self.metrics.increment_tracked();
        self.shadow_deliver(event.clone());

        if !event.audit {
            let requires_bootstrap = self.registry.read().any_requires_session_bootstrap();
            self.session.on_track(requires_bootstrap).await?;
        }

        // Queue votes come first and are decisive: an event a validator
        // holds is never dropped or purged in the same pass. Merge
        // contributions are independent and fold in even from validators
        // that let the event pass.
        let mut event = event;
        let mut queue_reason: Option<QueueReason> = None;
        for validator in &self.validators {
            let check = validator.should_queue(&event).await;
            if let Some(merge) = check.merge {
                event = event.merged(&merge);
            }
            if queue_reason.is_none() {
                queue_reason = check.queue;
            }
        }
        if !event.bypass_queue
            && let Some(reason) = queue_reason
        {
            return self.enqueue(event, reason).await;
        }

        for validator in &self.validators {
            if validator.should_drop(&event).await {
                self.metrics.increment_dropped();
                debug!(event = %event.name, validator = validator.name(), "event dropped");
                return Ok(DispatchOutcome::Dropped {
                    validator: validator.name().to_owned(),
                });
            }
        }

        for validator in &self.validators {
            if validator.should_purge(&event).await {
                let purged = self.queue.clear().await?;
                self.metrics.increment_purged();
                info!(validator = validator.name(), purged, "queue purged");
                return Ok(DispatchOutcome::Purged {
                    validator: validator.name().to_owned(),
                    purged,
                });
            }
        }

        if !event.bypass_queue
            && let Some(reason) = self.batching_verdict(&event).await
        {
            return self.enqueue(event, reason).await;
        }

        // With no transport registered nothing can receive the event, so it
        // is held regardless of bypass markers.
        let no_dispatchers = self.registry.read().is_empty();
        if no_dispatchers {
            return self.enqueue(event, QueueReason::DispatchersNotReady).await;
        }

        let results = self.deliver_single(&event).await;
        Ok(DispatchOutcome::Delivered { results })
    }

    /// The internal batching policy, applied only when no validator voted to
    /// queue. When the backend cannot persist a queue, the policy fails open
    /// to immediate delivery rather than holding events it could lose.
    async fn batching_verdict(&self, event: &TrackEvent) -> Option<QueueReason> {
        if !self.backend.can_write().await {
            warn!("storage not writable, skipping batching checks");
            return None;
        }
        if !self.connectivity.is_connected() {
            return Some(QueueReason::Connectivity);
        }
        if self.battery_insufficient(event) {
            return Some(QueueReason::InsufficientBattery);
        }
        if self.config.batching_active() && !self.config.is_bypass_event(&event.name) {
            return Some(QueueReason::Batching);
        }
        None
    }

    fn battery_insufficient(&self, event: &TrackEvent) -> bool {
        self.config.battery_saver
            && !event.bypass_battery
            && self.power.low_power_mode()
            && (self.power.battery_percent() - BATTERY_UNKNOWN).abs() > f64::EPSILON
    }

    async fn enqueue(
        &self,
        event: TrackEvent,
        reason: QueueReason,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.queue.append(event, reason.clone()).await?;
        self.metrics.increment_queued();
        debug!(reason = %reason, queue_len = self.queue.len(), "event queued");

        if reason == QueueReason::Batching
            && self.queue.len() >= self.config.events_before_auto_dispatch
            && !(self.config.battery_saver && self.power.low_power_mode())
        {
            self.release_inner().await?;
        }

        Ok(DispatchOutcome::Queued { reason })
    }

    /// Deliver everything currently queued, in FIFO order, chunked by
    /// `max_dispatch_size`. Entries a validator now rejects are dropped.
    pub async fn release(&self) -> Result<Vec<DeliveryResult>, DispatchError> {
        let _guard = self.pipeline.lock().await;
        self.release_inner().await
    }

    async fn release_inner(&self) -> Result<Vec<DeliveryResult>, DispatchError> {
        if !self.connectivity.is_connected() {
            debug!("skipping release while offline");
            return Ok(Vec::new());
        }
        let no_dispatchers = self.registry.read().is_empty();
        if no_dispatchers {
            // Handing events to zero dispatchers would lose them; they stay
            // queued until a transport is registered.
            debug!("skipping release, no dispatchers registered");
            return Ok(Vec::new());
        }
        let entries = self.queue.dequeue_all().await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = entries.len(), "releasing queued events");
        self.metrics.increment_released();

        let mut events = Vec::new();
        'entries: for entry in entries {
            for validator in &self.validators {
                if validator.should_drop(&entry.event).await {
                    self.metrics.increment_dropped();
                    debug!(
                        event = %entry.event.name,
                        validator = validator.name(),
                        "queued event dropped at release"
                    );
                    continue 'entries;
                }
            }
            // Released events must not re-enter the queue.
            events.push(entry.event.with_bypass_queue());
        }

        let mut results = Vec::new();
        let chunk_size = self.config.max_dispatch_size.max(1);
        for chunk in events.chunks(chunk_size) {
            if let [event] = chunk {
                results.extend(self.deliver_single(event).await);
            } else {
                results.extend(self.deliver_chunk(chunk).await);
            }
        }
        Ok(results)
    }

    async fn deliver_single(&self, event: &TrackEvent) -> Vec<DeliveryResult> {
        let finished = self.finish(event).await;
        for listener in &self.listeners {
            listener.will_deliver(&finished).await;
        }

        let dispatchers = self.registry.read().all();
        let attempts = dispatchers.into_iter().map(|dispatcher| {
            let event = finished.clone();
            async move {
                let name = dispatcher.name().to_owned();
                match dispatcher.deliver(&event).await {
                    Ok(()) => DeliveryResult {
                        dispatcher: name,
                        success: true,
                        error: None,
                    },
                    Err(e) => {
                        warn!(dispatcher = %name, error = %e, "delivery failed");
                        DeliveryResult {
                            dispatcher: name,
                            success: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        });
        let results = join_all(attempts).await;

        self.metrics.increment_delivered();
        for _ in 0..results.iter().filter(|r| !r.success).count() {
            self.metrics.increment_delivery_failures();
        }
        results
    }

    async fn deliver_chunk(&self, events: &[TrackEvent]) -> Vec<DeliveryResult> {
        let mut finished = Vec::with_capacity(events.len());
        for event in events {
            let event = self.finish(event).await;
            for listener in &self.listeners {
                listener.will_deliver(&event).await;
            }
            finished.push(event);
        }
        let batch = EventBatch::new(finished);

        let dispatchers = self.registry.read().all();
        let attempts = dispatchers.into_iter().map(|dispatcher| {
            let batch = batch.clone();
            async move {
                let name = dispatcher.name().to_owned();
                match dispatcher.deliver_batch(&batch).await {
                    Ok(()) => DeliveryResult {
                        dispatcher: name,
                        success: true,
                        error: None,
                    },
                    Err(e) => {
                        warn!(dispatcher = %name, error = %e, "batch delivery failed");
                        DeliveryResult {
                            dispatcher: name,
                            success: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        });
        let results = join_all(attempts).await;

        for _ in 0..batch.len() {
            self.metrics.increment_delivered();
        }
        for _ in 0..results.iter().filter(|r| !r.success).count() {
            self.metrics.increment_delivery_failures();
        }
        results
    }

    /// Fold session and collector context under the event's own payload.
    /// Explicit payload keys always win over ambient context.
    async fn finish(&self, event: &TrackEvent) -> TrackEvent {
        let mut payload = self.session.session_data();
        for collector in &self.collectors {
            if let Some(data) = collector.data().await {
                for (key, value) in data {
                    payload.insert(key, value);
                }
            }
        }
        for (key, value) in &event.payload {
            payload.insert(key.clone(), value.clone());
        }

        let mut finished = event.clone();
        finished.payload = payload;
        finished
    }

    /// Hand a copy of an incoming event to the shadow dispatcher. Failures
    /// are logged and never surface in outcomes.
    fn shadow_deliver(&self, event: TrackEvent) {
        let Some(shadow) = self.shadow.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = shadow.deliver(&event).await {
                debug!(dispatcher = shadow.name(), error = %e, "shadow delivery failed");
            }
        });
    }

    /// Rebuild the dispatcher registry through the configured factory and
    /// release the queue. Host platforms call this when reachability
    /// returns.
    pub async fn on_connectivity_restored(&self) -> Result<Vec<DeliveryResult>, DispatchError> {
        let _guard = self.pipeline.lock().await;
        if let Some(factory) = &self.dispatcher_factory {
            let registry = factory();
            debug!(dispatchers = registry.len(), "rebuilt dispatcher registry");
            *self.registry.write() = registry;
        }
        self.release_inner().await
    }

    /// Register an additional dispatcher at runtime.
    pub fn register_dispatcher(&self, dispatcher: Arc<dyn DynDispatcher>) {
        self.registry.write().register(dispatcher);
    }

    /// Update the consent status and run the auditing events the change
    /// produces through the pipeline. Granting consent releases the queue;
    /// declining purges it.
    pub async fn set_consent_status(
        &self,
        status: ConsentStatus,
    ) -> Result<Vec<DispatchOutcome>, DispatchError> {
        let audits = self.consent.set_status(status).await?;
        self.after_consent_change(audits).await
    }

    /// Grant consent for an explicit category selection, with the same
    /// queue-release and auditing behavior as [`set_consent_status`](Self::set_consent_status).
    pub async fn set_consent_categories(
        &self,
        categories: std::collections::BTreeSet<ConsentCategory>,
    ) -> Result<Vec<DispatchOutcome>, DispatchError> {
        let audits = self.consent.set_categories(categories).await?;
        self.after_consent_change(audits).await
    }

    async fn after_consent_change(
        &self,
        audits: Vec<TrackEvent>,
    ) -> Result<Vec<DispatchOutcome>, DispatchError> {
        {
            let _guard = self.pipeline.lock().await;
            match self.consent.status() {
                ConsentStatus::Consented => {
                    self.release_inner().await?;
                }
                ConsentStatus::NotConsented => {
                    let purged = self.queue.clear().await?;
                    if purged > 0 {
                        self.metrics.increment_purged();
                        info!(purged, "queue purged after consent decline");
                    }
                }
                ConsentStatus::Unknown => {}
            }
        }

        let mut outcomes = Vec::with_capacity(audits.len());
        for audit in audits {
            outcomes.push(self.track_event(audit).await?);
        }
        Ok(outcomes)
    }

    /// Forget the stored consent selection and return to `Unknown`.
    pub async fn reset_consent(&self) -> Result<(), DispatchError> {
        self.consent.reset().await
    }

    /// Current consent status.
    #[must_use]
    pub fn consent_status(&self) -> ConsentStatus {
        self.consent.status()
    }

    /// The expiring data store backing session and event context.
    #[must_use]
    pub fn data_store(&self) -> &ExpiringDataStore {
        self.session.store()
    }

    /// The active session id.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session.session_id()
    }

    /// Number of events currently queued.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Snapshot of the currently queued entries, oldest first.
    #[must_use]
    pub fn queued_entries(&self) -> Vec<QueueEntry> {
        self.queue.peek()
    }

    /// Discard every queued event without delivering. Returns how many were
    /// removed.
    pub async fn clear_queue(&self) -> Result<usize, DispatchError> {
        let _guard = self.pipeline.lock().await;
        self.queue.clear().await
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Point-in-time view of the pipeline counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Reference to the live counters, for wiring into host observability.
    #[must_use]
    pub fn metrics_handle(&self) -> &DispatchMetrics {
        &self.metrics
    }
}
