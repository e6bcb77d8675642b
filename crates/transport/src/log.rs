use tracing::info;

use beacon_core::{EventBatch, TrackEvent};

use crate::dispatcher::Dispatcher;
use crate::error::TransportError;

/// A dispatcher that logs each payload and reports success without any
/// external I/O.
///
/// Useful for local development and tests where no collection endpoint is
/// available.
pub struct LogDispatcher {
    name: String,
}

impl LogDispatcher {
    /// Create a new `LogDispatcher` with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Dispatcher for LogDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::unused_async)]
    async fn deliver(&self, event: &TrackEvent) -> Result<(), TransportError> {
        info!(
            dispatcher = %self.name,
            event_id = %event.id,
            event_name = %event.name,
            "log dispatcher delivered event"
        );
        Ok(())
    }

    #[allow(clippy::unused_async)]
    async fn deliver_batch(&self, batch: &EventBatch) -> Result<(), TransportError> {
        info!(
            dispatcher = %self.name,
            batch_id = %batch.id,
            size = batch.len(),
            "log dispatcher delivered batch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    #[test]
    fn log_dispatcher_name() {
        let dispatcher = LogDispatcher::new("dev-log");
        assert_eq!(Dispatcher::name(&dispatcher), "dev-log");
    }

    #[tokio::test]
    async fn log_dispatcher_delivers() {
        let dispatcher = LogDispatcher::new("dev-log");
        let event = TrackEvent::new("launch", Map::new());
        Dispatcher::deliver(&dispatcher, &event).await.unwrap();

        let batch = EventBatch::new(vec![TrackEvent::new("a", Map::new())]);
        Dispatcher::deliver_batch(&dispatcher, &batch).await.unwrap();
    }
}
