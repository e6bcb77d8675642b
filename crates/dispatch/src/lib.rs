pub mod builder;
pub mod config;
pub mod consent;
pub mod data_store;
pub mod enrichment;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod probes;
pub mod queue;
pub mod session;
pub mod validator;

pub use builder::DispatchManagerBuilder;
pub use config::{BYPASS_EVENT_NAMES, DispatchConfig};
pub use consent::{CONSENT_SYNC_EVENT, ConsentGate};
pub use data_store::ExpiringDataStore;
pub use enrichment::{
    EnrichmentConfig, EnrichmentFetcher, HostedCacheItem, HostedDataCache, HttpEnrichmentFetcher,
    LOOKUP_FAILURE_KEY,
};
pub use error::DispatchError;
pub use manager::{DispatchManager, DispatcherFactory};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use probes::{
    BATTERY_UNKNOWN, ConnectivityProbe, PowerProbe, SimulatedConnectivity, SimulatedPower,
};
pub use queue::{PersistentQueue, QueueEntry};
pub use session::{HttpSessionBootstrapper, SessionBootstrapper, SessionTracker};
pub use validator::{Collector, DispatchListener, DispatchValidator, QueueCheck};
