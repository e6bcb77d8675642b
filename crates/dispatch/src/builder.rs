use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use beacon_state::StorageBackend;
use beacon_transport::{DispatcherRegistry, DynDispatcher};

use crate::config::DispatchConfig;
use crate::consent::ConsentGate;
use crate::data_store::ExpiringDataStore;
use crate::enrichment::{EnrichmentConfig, EnrichmentFetcher, HostedDataCache};
use crate::error::DispatchError;
use crate::manager::{DispatchManager, DispatcherFactory};
use crate::metrics::DispatchMetrics;
use crate::probes::{ConnectivityProbe, PowerProbe, SimulatedConnectivity, SimulatedPower};
use crate::queue::PersistentQueue;
use crate::session::{SessionBootstrapper, SessionTracker};
use crate::validator::{Collector, DispatchListener, DispatchValidator};

/// Assembles a [`DispatchManager`] from its components, restoring persisted
/// state from the storage backend.
///
/// The backend is the only required component. The consent gate is always
/// installed as the first validator so nothing outruns the consent decision;
/// the hosted-data cache follows when enrichment is configured; caller
/// validators run after both.
pub struct DispatchManagerBuilder {
    config: DispatchConfig,
    backend: Option<Arc<dyn StorageBackend>>,
    validators: Vec<Arc<dyn DispatchValidator>>,
    listeners: Vec<Arc<dyn DispatchListener>>,
    collectors: Vec<Arc<dyn Collector>>,
    registry: DispatcherRegistry,
    dispatcher_factory: Option<DispatcherFactory>,
    shadow: Option<Arc<dyn DynDispatcher>>,
    connectivity: Option<Arc<dyn ConnectivityProbe>>,
    power: Option<Arc<dyn PowerProbe>>,
    enrichment: Option<(EnrichmentConfig, Arc<dyn EnrichmentFetcher>)>,
    bootstrapper: Option<Arc<dyn SessionBootstrapper>>,
}

impl Default for DispatchManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchManagerBuilder {
    /// Create a builder with default configuration and no components.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: DispatchConfig::default(),
            backend: None,
            validators: Vec::new(),
            listeners: Vec::new(),
            collectors: Vec::new(),
            registry: DispatcherRegistry::new(),
            dispatcher_factory: None,
            shadow: None,
            connectivity: None,
            power: None,
            enrichment: None,
            bootstrapper: None,
        }
    }

    /// Set the pipeline configuration.
    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the storage backend. Required.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Append a validator, consulted after the built-in ones.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn DispatchValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    /// Append a pre-delivery listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn DispatchListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Append a context collector.
    #[must_use]
    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// Register a delivery dispatcher.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn DynDispatcher>) -> Self {
        self.registry.register(dispatcher);
        self
    }

    /// Set a factory that rebuilds the registry when connectivity returns.
    /// When no dispatchers were registered directly, the factory also
    /// provides the initial registry.
    #[must_use]
    pub fn with_dispatcher_factory(mut self, factory: DispatcherFactory) -> Self {
        self.dispatcher_factory = Some(factory);
        self
    }

    /// Set a shadow dispatcher that receives a copy of every delivered
    /// payload, outside the reported results.
    #[must_use]
    pub fn with_shadow_dispatcher(mut self, dispatcher: Arc<dyn DynDispatcher>) -> Self {
        self.shadow = Some(dispatcher);
        self
    }

    /// Set the connectivity probe. Defaults to a probe that always reports
    /// connected.
    #[must_use]
    pub fn with_connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity = Some(probe);
        self
    }

    /// Set the power probe. Defaults to a probe reporting a full battery.
    #[must_use]
    pub fn with_power(mut self, probe: Arc<dyn PowerProbe>) -> Self {
        self.power = Some(probe);
        self
    }

    /// Enable hosted-data enrichment.
    #[must_use]
    pub fn with_enrichment(
        mut self,
        config: EnrichmentConfig,
        fetcher: Arc<dyn EnrichmentFetcher>,
    ) -> Self {
        self.enrichment = Some((config, fetcher));
        self
    }

    /// Set the session bootstrapper used by the consecutive-track heuristic.
    #[must_use]
    pub fn with_session_bootstrapper(mut self, bootstrapper: Arc<dyn SessionBootstrapper>) -> Self {
        self.bootstrapper = Some(bootstrapper);
        self
    }

    /// Restore persisted state and assemble the manager.
    pub async fn build(self) -> Result<DispatchManager, DispatchError> {
        let backend = self
            .backend
            .ok_or_else(|| DispatchError::Configuration("storage backend is required".into()))?;

        let max_age = (self.config.batch_expiration_days > 0)
            .then(|| chrono::Duration::days(self.config.batch_expiration_days));
        let queue = PersistentQueue::restore(
            Arc::clone(&backend),
            self.config.max_queue_size,
            max_age,
        )
        .await;

        let store = ExpiringDataStore::restore(Arc::clone(&backend)).await;
        let session = SessionTracker::start(
            store,
            self.config.minutes_between_session_id,
            self.config.seconds_between_track_events,
            self.bootstrapper,
        )
        .await?;

        let consent = Arc::new(
            ConsentGate::restore(
                Arc::clone(&backend),
                self.config.consent_policy,
                self.config.consent_logging,
            )
            .await,
        );

        let mut validators: Vec<Arc<dyn DispatchValidator>> = Vec::new();
        validators.push(Arc::clone(&consent) as Arc<dyn DispatchValidator>);
        if let Some((enrichment_config, fetcher)) = self.enrichment {
            let cache =
                HostedDataCache::restore(Arc::clone(&backend), enrichment_config, fetcher).await;
            validators.push(Arc::new(cache));
        }
        validators.extend(self.validators);

        let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
        collectors.push(Arc::clone(&consent) as Arc<dyn Collector>);
        collectors.extend(self.collectors);

        let registry = if self.registry.is_empty()
            && let Some(factory) = &self.dispatcher_factory
        {
            factory()
        } else {
            self.registry
        };
        debug!(dispatchers = registry.len(), "dispatch manager assembled");

        Ok(DispatchManager {
            config: self.config,
            backend,
            queue,
            session,
            consent,
            validators,
            listeners: self.listeners,
            collectors,
            registry: RwLock::new(registry),
            dispatcher_factory: self.dispatcher_factory,
            shadow: self.shadow,
            connectivity: self
                .connectivity
                .unwrap_or_else(|| Arc::new(SimulatedConnectivity::connected())),
            power: self.power.unwrap_or_else(|| Arc::new(SimulatedPower::full())),
            metrics: DispatchMetrics::default(),
            pipeline: tokio::sync::Mutex::new(()),
        })
    }
}
