use async_trait::async_trait;

use beacon_core::{EventBatch, TrackEvent};

use crate::error::TransportError;

/// Strongly-typed delivery transport trait with native `async fn`.
///
/// This trait is **not** object-safe because it uses native `async fn`
/// methods. For dynamic dispatch, use [`DynDispatcher`] -- every `Dispatcher`
/// automatically implements `DynDispatcher` via a blanket implementation.
pub trait Dispatcher: Send + Sync {
    /// Returns the unique name of this dispatcher.
    fn name(&self) -> &str;

    /// Deliver a single finished event.
    fn deliver(
        &self,
        event: &TrackEvent,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Deliver a batch of events in one attempt.
    ///
    /// The default implementation delivers each event in order and returns
    /// the first failure. Transports with a native batch endpoint should
    /// override this.
    fn deliver_batch(
        &self,
        batch: &EventBatch,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send {
        async move {
            for event in &batch.events {
                self.deliver(event).await?;
            }
            Ok(())
        }
    }

    /// Whether this transport needs a server-side session to be bootstrapped
    /// before repeated traffic arrives.
    ///
    /// Drives the session tracker's consecutive-track heuristic. Defaults to
    /// `false`.
    fn requires_session_bootstrap(&self) -> bool {
        false
    }
}

/// Object-safe dispatcher trait for use behind `Arc<dyn DynDispatcher>`.
///
/// You generally should not implement this trait directly -- implement
/// [`Dispatcher`] and rely on the blanket implementation.
#[async_trait]
pub trait DynDispatcher: Send + Sync {
    /// Returns the unique name of this dispatcher.
    fn name(&self) -> &str;

    /// Deliver a single finished event.
    async fn deliver(&self, event: &TrackEvent) -> Result<(), TransportError>;

    /// Deliver a batch of events in one attempt.
    async fn deliver_batch(&self, batch: &EventBatch) -> Result<(), TransportError>;

    /// Whether this transport needs server-side session bootstrapping.
    fn requires_session_bootstrap(&self) -> bool {
        false
    }
}

/// Blanket implementation bridging the static and dynamic dispatch worlds.
#[async_trait]
impl<T: Dispatcher + Sync> DynDispatcher for T {
    fn name(&self) -> &str {
        Dispatcher::name(self)
    }

    async fn deliver(&self, event: &TrackEvent) -> Result<(), TransportError> {
        Dispatcher::deliver(self, event).await
    }

    async fn deliver_batch(&self, batch: &EventBatch) -> Result<(), TransportError> {
        Dispatcher::deliver_batch(self, batch).await
    }

    fn requires_session_bootstrap(&self) -> bool {
        Dispatcher::requires_session_bootstrap(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::Map;

    use super::*;

    struct MockDispatcher {
        dispatcher_name: String,
        delivered: AtomicU32,
        should_fail: bool,
    }

    impl MockDispatcher {
        fn new(name: &str, should_fail: bool) -> Self {
            Self {
                dispatcher_name: name.to_owned(),
                delivered: AtomicU32::new(0),
                should_fail,
            }
        }
    }

    impl Dispatcher for MockDispatcher {
        fn name(&self) -> &str {
            &self.dispatcher_name
        }

        async fn deliver(&self, _event: &TrackEvent) -> Result<(), TransportError> {
            if self.should_fail {
                return Err(TransportError::Connection("mock failure".into()));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn blanket_dyn_dispatcher_impl() {
        let dispatcher: Arc<dyn DynDispatcher> = Arc::new(MockDispatcher::new("mock", false));
        assert_eq!(dispatcher.name(), "mock");
        assert!(!dispatcher.requires_session_bootstrap());

        let event = TrackEvent::new("launch", Map::new());
        dispatcher.deliver(&event).await.unwrap();
    }

    #[tokio::test]
    async fn default_batch_delivers_each_event() {
        let dispatcher = MockDispatcher::new("mock", false);
        let batch = EventBatch::new(vec![
            TrackEvent::new("a", Map::new()),
            TrackEvent::new("b", Map::new()),
            TrackEvent::new("c", Map::new()),
        ]);
        Dispatcher::deliver_batch(&dispatcher, &batch).await.unwrap();
        assert_eq!(dispatcher.delivered.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn default_batch_stops_on_first_failure() {
        let dispatcher = MockDispatcher::new("mock", true);
        let batch = EventBatch::new(vec![TrackEvent::new("a", Map::new())]);
        let err = Dispatcher::deliver_batch(&dispatcher, &batch)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }
}
