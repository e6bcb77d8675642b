use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use beacon_core::{QueueReason, TrackEvent};
use beacon_state::{StorageBackend, StoreKey};
use beacon_transport::TransportError;

use crate::validator::{DispatchValidator, QueueCheck};

/// Merge field set on events whose hosted-data lookup permanently failed.
pub const LOOKUP_FAILURE_KEY: &str = "hosted_data_lookup_failure";

/// Configuration for the hosted-data cache.
#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Maps an event name to the payload key holding the lookup id.
    /// Events without a mapping are never enriched.
    pub lookup_keys: HashMap<String, String>,
    /// Maximum number of cached records; the oldest is evicted beyond it.
    pub max_cache_size: usize,
    /// Cached records older than this are refetched on next use.
    pub cache_ttl: chrono::Duration,
    /// Fetch attempts before an id is written to the negative cache.
    pub max_attempts: u32,
    /// Lower bound of the randomized delay between fetch attempts.
    pub backoff_min: Duration,
    /// Upper bound of the randomized delay between fetch attempts.
    pub backoff_max: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            lookup_keys: HashMap::new(),
            max_cache_size: 50,
            cache_ttl: chrono::Duration::days(3),
            max_attempts: 5,
            backoff_min: Duration::from_secs(10),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Fetches a hosted-data record for a lookup id.
///
/// An `Ok` with an empty map means the backend answered and has no record;
/// the id is then negatively cached and never retried.
#[async_trait]
pub trait EnrichmentFetcher: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Map<String, Value>, TransportError>;
}

/// HTTP [`EnrichmentFetcher`] GETting `{base_url}/{id}` and expecting a JSON
/// object body.
pub struct HttpEnrichmentFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEnrichmentFetcher {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl EnrichmentFetcher for HttpEnrichmentFetcher {
    async fn fetch(&self, id: &str) -> Result<Map<String, Value>, TransportError> {
        let url = format!("{}/{id}", self.base_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(Duration::from_secs(30))
            } else {
                TransportError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // A definitive miss, not a transport failure.
            return Ok(Map::new());
        }
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }
        response
            .json::<Map<String, Value>>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// A cached hosted-data record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedCacheItem {
    /// The lookup id the record was fetched for.
    pub id: String,
    /// The record's fields, merged into matching events.
    pub data: Map<String, Value>,
    /// When the record was fetched.
    pub fetched_at: DateTime<Utc>,
}

#[derive(Default, Serialize, Deserialize)]
struct CacheSnapshot {
    items: Vec<HostedCacheItem>,
    negative: Vec<String>,
}

#[derive(Default)]
struct CacheInner {
    /// Records in fetch order, oldest first.
    items: VecDeque<HostedCacheItem>,
    /// Ids whose lookup permanently failed. Never retried.
    negative: HashSet<String>,
    /// Ids with a fetch task currently running.
    in_flight: HashSet<String>,
}

/// Bounded cache of hosted-data records with background fetch and a
/// negative cache.
///
/// As a validator: a cache hit contributes the record as merge data without
/// queueing; a miss starts one background fetch for the id and holds the
/// event until the record arrives; a negatively cached id attaches a lookup
/// failure marker and lets the event proceed.
pub struct HostedDataCache {
    backend: Arc<dyn StorageBackend>,
    config: EnrichmentConfig,
    fetcher: Arc<dyn EnrichmentFetcher>,
    inner: Arc<Mutex<CacheInner>>,
}

impl HostedDataCache {
    /// Load the cache from storage. In-flight state is never persisted.
    pub async fn restore(
        backend: Arc<dyn StorageBackend>,
        config: EnrichmentConfig,
        fetcher: Arc<dyn EnrichmentFetcher>,
    ) -> Self {
        let inner = match backend.retrieve(&StoreKey::HostedCache).await {
            Ok(Some(raw)) => match serde_json::from_str::<CacheSnapshot>(&raw) {
                Ok(snapshot) => {
                    debug!(
                        items = snapshot.items.len(),
                        negative = snapshot.negative.len(),
                        "restored hosted-data cache"
                    );
                    CacheInner {
                        items: snapshot.items.into(),
                        negative: snapshot.negative.into_iter().collect(),
                        in_flight: HashSet::new(),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "persisted hosted-data cache undecodable, starting empty");
                    CacheInner::default()
                }
            },
            Ok(None) => CacheInner::default(),
            Err(e) => {
                warn!(error = %e, "failed to read hosted-data cache, starting empty");
                CacheInner::default()
            }
        };

        Self {
            backend,
            config,
            fetcher,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Return `true` if no records are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Whether `id` is in the negative cache.
    #[must_use]
    pub fn is_negative(&self, id: &str) -> bool {
        self.inner.lock().negative.contains(id)
    }

    /// The lookup id for `event`, when its name has a configured lookup key
    /// and the payload carries a value for it.
    fn lookup_id(&self, event: &TrackEvent) -> Option<String> {
        let key = self.config.lookup_keys.get(&event.name)?;
        event.string_value(key).map(ToOwned::to_owned)
    }

    fn spawn_fetch(&self, id: String) {
        let fetcher = Arc::clone(&self.fetcher);
        let backend = Arc::clone(&self.backend);
        let inner = Arc::clone(&self.inner);
        let max_attempts = self.config.max_attempts.max(1);
        let max_cache_size = self.config.max_cache_size;
        let backoff_min = self.config.backoff_min;
        let backoff_max = self.config.backoff_max;

        tokio::spawn(async move {
            let mut attempt = 0;
            let outcome = loop {
                attempt += 1;
                match fetcher.fetch(&id).await {
                    Ok(data) if data.is_empty() => break None,
                    Ok(data) => break Some(data),
                    Err(e) if e.is_retryable() && attempt < max_attempts => {
                        let delay = jittered_delay(backoff_min, backoff_max);
                        debug!(
                            id = %id,
                            attempt,
                            ?delay,
                            error = %e,
                            "hosted-data fetch failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        warn!(id = %id, attempt, error = %e, "hosted-data fetch gave up");
                        break None;
                    }
                }
            };

            {
                let mut inner = inner.lock();
                inner.in_flight.remove(&id);
                match outcome {
                    Some(data) => {
                        inner.items.push_back(HostedCacheItem {
                            id: id.clone(),
                            data,
                            fetched_at: Utc::now(),
                        });
                        while inner.items.len() > max_cache_size {
                            inner.items.pop_front();
                        }
                    }
                    None => {
                        inner.negative.insert(id.clone());
                    }
                }
            }

            if let Err(e) = persist(&backend, &inner).await {
                warn!(error = %e, "failed to persist hosted-data cache");
            }
        });
    }
}

async fn persist(
    backend: &Arc<dyn StorageBackend>,
    inner: &Arc<Mutex<CacheInner>>,
) -> Result<(), beacon_state::StateError> {
    let snapshot = {
        let inner = inner.lock();
        CacheSnapshot {
            items: inner.items.iter().cloned().collect(),
            negative: inner.negative.iter().cloned().collect(),
        }
    };
    let raw = serde_json::to_string(&snapshot)
        .map_err(|e| beacon_state::StateError::Serialization(e.to_string()))?;
    backend.save(&StoreKey::HostedCache, &raw).await
}

fn jittered_delay(min: Duration, max: Duration) -> Duration {
    let lo = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let hi = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

#[async_trait]
impl DispatchValidator for HostedDataCache {
    fn name(&self) -> &str {
        "hosted-data-cache"
    }

    async fn should_queue(&self, event: &TrackEvent) -> QueueCheck {
        let Some(id) = self.lookup_id(event) else {
            return QueueCheck::pass();
        };

        let start_fetch = {
            let mut inner = self.inner.lock();

            if inner.negative.contains(&id) {
                let mut marker = Map::new();
                marker.insert(LOOKUP_FAILURE_KEY.into(), json!(true));
                return QueueCheck::merge_only(marker);
            }

            let ttl_cutoff = Utc::now() - self.config.cache_ttl;
            if let Some(pos) = inner.items.iter().position(|item| item.id == id) {
                if inner.items[pos].fetched_at >= ttl_cutoff {
                    let data = inner.items[pos].data.clone();
                    return QueueCheck::merge_only(data);
                }
                // Stale record; drop it and refetch.
                inner.items.remove(pos);
            }

            inner.in_flight.insert(id.clone())
        };

        if start_fetch {
            self.spawn_fetch(id);
        }
        QueueCheck::queue(QueueReason::AwaitingEnrichment, None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use beacon_state_memory::MemoryBackend;

    use super::*;

    struct ScriptedFetcher {
        calls: AtomicU32,
        response: Box<dyn Fn(u32) -> Result<Map<String, Value>, TransportError> + Send + Sync>,
    }

    impl ScriptedFetcher {
        fn always(result: Result<Map<String, Value>, TransportError>) -> Self {
            Self {
                calls: AtomicU32::new(0),
                response: Box::new(move |_| result.clone()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EnrichmentFetcher for ScriptedFetcher {
        async fn fetch(&self, _id: &str) -> Result<Map<String, Value>, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.response)(call)
        }
    }

    fn record() -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("store_name".into(), json!("Downtown"));
        data.insert("region".into(), json!("us-east"));
        data
    }

    fn config() -> EnrichmentConfig {
        let mut lookup_keys = HashMap::new();
        lookup_keys.insert("store_visit".to_string(), "store_id".to_string());
        EnrichmentConfig {
            lookup_keys,
            backoff_min: Duration::from_millis(1),
            backoff_max: Duration::from_millis(2),
            ..EnrichmentConfig::default()
        }
    }

    fn store_event(id: &str) -> TrackEvent {
        let mut payload = Map::new();
        payload.insert("store_id".into(), json!(id));
        TrackEvent::new("store_visit", payload)
    }

    async fn cache(fetcher: Arc<ScriptedFetcher>, config: EnrichmentConfig) -> HostedDataCache {
        HostedDataCache::restore(Arc::new(MemoryBackend::new()), config, fetcher).await
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn unmapped_event_passes_untouched() {
        let fetcher = Arc::new(ScriptedFetcher::always(Ok(record())));
        let cache = cache(Arc::clone(&fetcher), config()).await;

        let event = TrackEvent::new("screen_view", Map::new());
        let check = cache.should_queue(&event).await;
        assert!(check.queue.is_none());
        assert!(check.merge.is_none());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn miss_queues_then_hit_merges() {
        let fetcher = Arc::new(ScriptedFetcher::always(Ok(record())));
        let cache = cache(Arc::clone(&fetcher), config()).await;

        let check = cache.should_queue(&store_event("s-1")).await;
        assert_eq!(check.queue, Some(QueueReason::AwaitingEnrichment));

        settle().await;
        let check = cache.should_queue(&store_event("s-1")).await;
        assert!(check.queue.is_none());
        assert_eq!(
            check.merge.unwrap().get("store_name"),
            Some(&json!("Downtown"))
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_fetch_once() {
        let fetcher = Arc::new(ScriptedFetcher::always(Ok(record())));
        let cache = cache(Arc::clone(&fetcher), config()).await;

        cache.should_queue(&store_event("s-1")).await;
        cache.should_queue(&store_event("s-1")).await;
        settle().await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn empty_record_is_negatively_cached() {
        let fetcher = Arc::new(ScriptedFetcher::always(Ok(Map::new())));
        let cache = cache(Arc::clone(&fetcher), config()).await;

        cache.should_queue(&store_event("s-404")).await;
        settle().await;

        assert!(cache.is_negative("s-404"));
        let check = cache.should_queue(&store_event("s-404")).await;
        assert!(check.queue.is_none());
        assert_eq!(
            check.merge.unwrap().get(LOOKUP_FAILURE_KEY),
            Some(&json!(true))
        );
        // Never refetched.
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn non_retryable_error_goes_negative_immediately() {
        let fetcher = Arc::new(ScriptedFetcher::always(Err(TransportError::Decode(
            "malformed body".into(),
        ))));
        let cache = cache(Arc::clone(&fetcher), config()).await;

        cache.should_queue(&store_event("s-bad")).await;
        settle().await;

        assert!(cache.is_negative("s-bad"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn retryable_errors_exhaust_attempts_then_go_negative() {
        let fetcher = Arc::new(ScriptedFetcher::always(Err(TransportError::Connection(
            "refused".into(),
        ))));
        let mut cfg = config();
        cfg.max_attempts = 3;
        let cache = cache(Arc::clone(&fetcher), cfg).await;

        cache.should_queue(&store_event("s-down")).await;
        settle().await;

        assert_eq!(fetcher.calls(), 3);
        assert!(cache.is_negative("s-down"));
    }

    #[tokio::test]
    async fn retry_then_success_caches_record() {
        let fetcher = Arc::new(ScriptedFetcher {
            calls: AtomicU32::new(0),
            response: Box::new(|call| {
                if call < 3 {
                    Err(TransportError::Http { status: 503 })
                } else {
                    Ok(record())
                }
            }),
        });
        let cache = cache(Arc::clone(&fetcher), config()).await;

        cache.should_queue(&store_event("s-1")).await;
        settle().await;

        assert_eq!(fetcher.calls(), 3);
        assert!(!cache.is_negative("s-1"));
        let check = cache.should_queue(&store_event("s-1")).await;
        assert!(check.merge.is_some());
    }

    #[tokio::test]
    async fn stale_record_triggers_refetch() {
        let fetcher = Arc::new(ScriptedFetcher::always(Ok(record())));
        let cache = cache(Arc::clone(&fetcher), config()).await;

        cache.should_queue(&store_event("s-1")).await;
        settle().await;
        {
            let mut inner = cache.inner.lock();
            inner.items[0].fetched_at = Utc::now() - chrono::Duration::days(4);
        }

        let check = cache.should_queue(&store_event("s-1")).await;
        assert_eq!(check.queue, Some(QueueReason::AwaitingEnrichment));
        settle().await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn cache_bounded_by_size() {
        let fetcher = Arc::new(ScriptedFetcher::always(Ok(record())));
        let mut cfg = config();
        cfg.max_cache_size = 2;
        let cache = cache(Arc::clone(&fetcher), cfg).await;

        for id in ["s-1", "s-2", "s-3"] {
            cache.should_queue(&store_event(id)).await;
            settle().await;
        }

        assert_eq!(cache.len(), 2);
        // The oldest record was evicted.
        let inner = cache.inner.lock();
        let ids: Vec<&str> = inner.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["s-2", "s-3"]);
    }

    #[tokio::test]
    async fn cache_survives_restore() {
        let backend = Arc::new(MemoryBackend::new());
        let fetcher = Arc::new(ScriptedFetcher::always(Ok(record())));
        {
            let cache = HostedDataCache::restore(
                Arc::clone(&backend) as Arc<dyn StorageBackend>,
                config(),
                Arc::clone(&fetcher) as Arc<dyn EnrichmentFetcher>,
            )
            .await;
            cache.should_queue(&store_event("s-1")).await;
            settle().await;
        }

        let cache = HostedDataCache::restore(
            backend,
            config(),
            Arc::new(ScriptedFetcher::always(Ok(Map::new()))),
        )
        .await;
        assert_eq!(cache.len(), 1);
        let check = cache.should_queue(&store_event("s-1")).await;
        assert!(check.merge.is_some());
    }
}
