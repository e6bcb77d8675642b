use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Local, Offset, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use beacon_core::Expiry;
use beacon_transport::TransportError;

use crate::data_store::ExpiringDataStore;
use crate::error::DispatchError;

/// Data-store key holding the current session id.
pub const SESSION_ID_KEY: &str = "session_id";
/// Data-store key holding the last-activity instant (epoch milliseconds).
pub const LAST_ACTIVITY_KEY: &str = "last_session_activity";

const TIMESTAMP_UTC_KEY: &str = "timestamp";
const TIMESTAMP_LOCAL_KEY: &str = "timestamp_local";
const TIMESTAMP_EPOCH_KEY: &str = "timestamp_unix";
const TIMESTAMP_OFFSET_KEY: &str = "timestamp_offset";

/// Issues the best-effort session-bootstrap call some transports require
/// before repeated traffic arrives. Failures never affect local session
/// state.
#[async_trait]
pub trait SessionBootstrapper: Send + Sync {
    /// Announce `session_id` to the backend.
    async fn ping(&self, session_id: &str) -> Result<(), TransportError>;
}

/// HTTP [`SessionBootstrapper`] that GETs a bootstrap URL with the session
/// id as a query parameter.
pub struct HttpSessionBootstrapper {
    client: reqwest::Client,
    url: String,
}

impl HttpSessionBootstrapper {
    /// Create a bootstrapper targeting `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl SessionBootstrapper for HttpSessionBootstrapper {
    async fn ping(&self, session_id: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("session_id", session_id)])
            .send()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Http {
                status: status.as_u16(),
            })
        }
    }
}

/// Owns session-id continuity and the expiring data store.
///
/// A session is implicitly represented by `Session`-class data items; there
/// is no separate session table. The tracker decides on startup whether the
/// persisted session is still valid, renews it after the configured
/// inactivity gap, and stamps session data with its open-time fields exactly
/// once per session.
pub struct SessionTracker {
    store: ExpiringDataStore,
    minutes_between_session_id: i64,
    seconds_between_track_events: i64,
    session_id: Mutex<String>,
    last_activity: Mutex<Option<DateTime<Utc>>>,
    consecutive_tracks: AtomicU32,
    bootstrap_sent: AtomicBool,
    bootstrapper: Option<Arc<dyn SessionBootstrapper>>,
}

impl SessionTracker {
    /// Initialize the tracker, reusing the persisted session when its
    /// last-activity instant is within the inactivity gap and generating a
    /// fresh one otherwise.
    pub async fn start(
        store: ExpiringDataStore,
        minutes_between_session_id: i64,
        seconds_between_track_events: i64,
        bootstrapper: Option<Arc<dyn SessionBootstrapper>>,
    ) -> Result<Self, DispatchError> {
        let persisted_id = store
            .get(SESSION_ID_KEY)
            .and_then(|v| v.as_str().map(ToOwned::to_owned));
        let persisted_activity = store
            .get(LAST_ACTIVITY_KEY)
            .and_then(|v| v.as_i64())
            .and_then(DateTime::<Utc>::from_timestamp_millis);

        let tracker = Self {
            store,
            minutes_between_session_id,
            seconds_between_track_events,
            session_id: Mutex::new(String::new()),
            last_activity: Mutex::new(persisted_activity),
            consecutive_tracks: AtomicU32::new(0),
            bootstrap_sent: AtomicBool::new(false),
            bootstrapper,
        };

        let reusable = match (persisted_id, persisted_activity) {
            (Some(id), Some(activity))
                if Utc::now().signed_duration_since(activity).num_minutes()
                    < minutes_between_session_id =>
            {
                Some(id)
            }
            _ => None,
        };

        if let Some(id) = reusable {
            debug!(session_id = %id, "reusing persisted session");
            *tracker.session_id.lock() = id;
            tracker.inject_open_timestamps().await?;
        } else {
            tracker.renew_session().await?;
        }

        Ok(tracker)
    }

    /// The active session id.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session_id.lock().clone()
    }

    /// All live session and event data, for merging into outgoing payloads.
    #[must_use]
    pub fn session_data(&self) -> Map<String, Value> {
        self.store.all_data()
    }

    /// The expiring data store this tracker owns.
    #[must_use]
    pub fn store(&self) -> &ExpiringDataStore {
        &self.store
    }

    /// Record a qualifying track call: renew the session if the inactivity
    /// gap was exceeded, refresh last-activity, and run the
    /// consecutive-track bootstrap heuristic.
    pub async fn on_track(&self, requires_bootstrap: bool) -> Result<(), DispatchError> {
        let now = Utc::now();
        let previous = *self.last_activity.lock();

        if let Some(prev) = previous
            && now.signed_duration_since(prev).num_minutes() >= self.minutes_between_session_id
        {
            self.renew_session().await?;
        }

        let within_window = previous.is_some_and(|prev| {
            now.signed_duration_since(prev).num_seconds() <= self.seconds_between_track_events
        });
        if within_window {
            let consecutive = self.consecutive_tracks.fetch_add(1, Ordering::SeqCst) + 1;
            if consecutive == 2
                && requires_bootstrap
                && !self.bootstrap_sent.swap(true, Ordering::SeqCst)
            {
                self.spawn_bootstrap_ping();
            }
        } else {
            self.consecutive_tracks.store(1, Ordering::SeqCst);
        }

        *self.last_activity.lock() = Some(now);
        self.store
            .add_value(
                LAST_ACTIVITY_KEY,
                json!(now.timestamp_millis()),
                Expiry::Forever,
            )
            .await?;
        self.inject_open_timestamps().await?;
        Ok(())
    }

    /// Replace the active session: new id, `Session`-class data reset, fresh
    /// open timestamps. Exactly one session is active at a time.
    async fn renew_session(&self) -> Result<(), DispatchError> {
        let now = Utc::now();
        let id = now.timestamp_millis().to_string();
        info!(session_id = %id, "starting new session");

        self.store.expire_session_data().await?;
        self.store
            .add_value(SESSION_ID_KEY, json!(id), Expiry::Forever)
            .await?;
        self.store
            .add_value(
                LAST_ACTIVITY_KEY,
                json!(now.timestamp_millis()),
                Expiry::Forever,
            )
            .await?;

        *self.session_id.lock() = id;
        *self.last_activity.lock() = Some(now);
        self.consecutive_tracks.store(0, Ordering::SeqCst);
        self.bootstrap_sent.store(false, Ordering::SeqCst);

        self.inject_open_timestamps().await
    }

    /// Stamp session data with the session's open time, once per session.
    /// The keys are `Session`-class, so they vanish with the session; the
    /// presence check keeps later track calls from overwriting the original
    /// open time.
    async fn inject_open_timestamps(&self) -> Result<(), DispatchError> {
        if self.store.contains(TIMESTAMP_UTC_KEY) {
            return Ok(());
        }

        let utc = Utc::now();
        let local = Local::now();
        let offset_hours = f64::from(local.offset().fix().local_minus_utc()) / 3600.0;

        let mut stamps = Map::new();
        stamps.insert(TIMESTAMP_UTC_KEY.into(), json!(utc.to_rfc3339()));
        stamps.insert(TIMESTAMP_LOCAL_KEY.into(), json!(local.to_rfc3339()));
        stamps.insert(TIMESTAMP_EPOCH_KEY.into(), json!(utc.timestamp()));
        stamps.insert(TIMESTAMP_OFFSET_KEY.into(), json!(offset_hours));
        self.store.add(stamps, Expiry::Session).await
    }

    fn spawn_bootstrap_ping(&self) {
        let Some(bootstrapper) = self.bootstrapper.clone() else {
            return;
        };
        let session_id = self.session_id();
        tokio::spawn(async move {
            match bootstrapper.ping(&session_id).await {
                Ok(()) => debug!(session_id = %session_id, "session bootstrap ping sent"),
                Err(e) => warn!(session_id = %session_id, error = %e, "session bootstrap ping failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use beacon_state::StorageBackend;
    use beacon_state_memory::MemoryBackend;

    use super::*;

    async fn fresh_store() -> (Arc<MemoryBackend>, ExpiringDataStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = ExpiringDataStore::restore(Arc::clone(&backend) as Arc<dyn StorageBackend>).await;
        (backend, store)
    }

    #[tokio::test]
    async fn fresh_start_generates_session() {
        let (_backend, store) = fresh_store().await;
        let tracker = SessionTracker::start(store, 30, 30, None).await.unwrap();

        let id = tracker.session_id();
        assert!(!id.is_empty());
        // Open timestamps are stamped once.
        assert!(tracker.store().contains(TIMESTAMP_UTC_KEY));
        assert!(tracker.store().contains(TIMESTAMP_EPOCH_KEY));
    }

    #[tokio::test]
    async fn recent_session_is_reused() {
        let (backend, store) = fresh_store().await;
        store
            .add_value(SESSION_ID_KEY, json!("previous-session"), Expiry::Forever)
            .await
            .unwrap();
        store
            .add_value(
                LAST_ACTIVITY_KEY,
                json!(Utc::now().timestamp_millis()),
                Expiry::Forever,
            )
            .await
            .unwrap();
        drop(backend);

        let tracker = SessionTracker::start(store, 30, 30, None).await.unwrap();
        assert_eq!(tracker.session_id(), "previous-session");
    }

    #[tokio::test]
    async fn stale_session_is_replaced() {
        let (_backend, store) = fresh_store().await;
        let stale = Utc::now() - chrono::Duration::minutes(45);
        store
            .add_value(SESSION_ID_KEY, json!("stale-session"), Expiry::Forever)
            .await
            .unwrap();
        store
            .add_value(LAST_ACTIVITY_KEY, json!(stale.timestamp_millis()), Expiry::Forever)
            .await
            .unwrap();

        let tracker = SessionTracker::start(store, 30, 30, None).await.unwrap();
        assert_ne!(tracker.session_id(), "stale-session");
    }

    #[tokio::test]
    async fn track_refreshes_last_activity() {
        let (_backend, store) = fresh_store().await;
        let tracker = SessionTracker::start(store, 30, 30, None).await.unwrap();

        tracker.on_track(false).await.unwrap();
        let persisted = tracker.store().get(LAST_ACTIVITY_KEY).unwrap();
        assert!(persisted.as_i64().is_some());
    }

    #[tokio::test]
    async fn open_timestamps_written_once_per_session() {
        let (_backend, store) = fresh_store().await;
        let tracker = SessionTracker::start(store, 30, 30, None).await.unwrap();

        let original = tracker.store().get(TIMESTAMP_EPOCH_KEY).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.on_track(false).await.unwrap();
        tracker.on_track(false).await.unwrap();

        assert_eq!(tracker.store().get(TIMESTAMP_EPOCH_KEY).unwrap(), original);
    }

    struct CountingBootstrapper {
        pings: AtomicU32,
    }

    #[async_trait]
    impl SessionBootstrapper for CountingBootstrapper {
        async fn ping(&self, _session_id: &str) -> Result<(), TransportError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_rapid_track_fires_one_bootstrap_ping() {
        let (_backend, store) = fresh_store().await;
        let bootstrapper = Arc::new(CountingBootstrapper {
            pings: AtomicU32::new(0),
        });
        let tracker = SessionTracker::start(
            store,
            30,
            30,
            Some(Arc::clone(&bootstrapper) as Arc<dyn SessionBootstrapper>),
        )
        .await
        .unwrap();

        for _ in 0..4 {
            tracker.on_track(true).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Fired on the second consecutive call, and only once per session.
        assert_eq!(bootstrapper.pings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_ping_when_transport_does_not_require_bootstrap() {
        let (_backend, store) = fresh_store().await;
        let bootstrapper = Arc::new(CountingBootstrapper {
            pings: AtomicU32::new(0),
        });
        let tracker = SessionTracker::start(
            store,
            30,
            30,
            Some(Arc::clone(&bootstrapper) as Arc<dyn SessionBootstrapper>),
        )
        .await
        .unwrap();

        for _ in 0..3 {
            tracker.on_track(false).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bootstrapper.pings.load(Ordering::SeqCst), 0);
    }
}
