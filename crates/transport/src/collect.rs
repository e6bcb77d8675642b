use reqwest::Client;

use beacon_core::{EventBatch, TrackEvent};

use crate::dispatcher::Dispatcher;
use crate::error::TransportError;

/// A dispatcher that posts event JSON to an HTTP collection endpoint.
///
/// Single events are posted as-is; batches are posted as one request with an
/// `events` array, so a release of N queued events costs one round-trip.
pub struct HttpCollectDispatcher {
    /// Unique name for this dispatcher instance.
    name: String,
    /// The collection endpoint URL.
    url: String,
    /// HTTP client used for outgoing requests.
    client: Client,
    /// Whether the backend expects a session to be bootstrapped server-side.
    session_bootstrap: bool,
}

impl HttpCollectDispatcher {
    /// Create a new collect dispatcher with a default `reqwest::Client`.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: Client::new(),
            session_bootstrap: false,
        }
    }

    /// Set a custom `reqwest::Client` (e.g. with timeouts configured).
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Mark this transport as requiring server-side session bootstrapping.
    #[must_use]
    pub fn with_session_bootstrap(mut self) -> Self {
        self.session_bootstrap = true;
        self
    }

    async fn post(&self, body: &serde_json::Value) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(std::time::Duration::from_secs(0))
                } else if e.is_connect() {
                    TransportError::Connection(e.to_string())
                } else {
                    TransportError::Failed(e.to_string())
                }
            })?;

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

impl Dispatcher for HttpCollectDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &TrackEvent) -> Result<(), TransportError> {
        let body = serde_json::to_value(event)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.post(&body).await
    }

    async fn deliver_batch(&self, batch: &EventBatch) -> Result<(), TransportError> {
        let events = serde_json::to_value(&batch.events)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.post(&serde_json::json!({ "events": events })).await
    }

    fn requires_session_bootstrap(&self) -> bool {
        self.session_bootstrap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_dispatcher_creation() {
        let dispatcher = HttpCollectDispatcher::new("collect", "https://collect.example.com/e");
        assert_eq!(Dispatcher::name(&dispatcher), "collect");
        assert!(!Dispatcher::requires_session_bootstrap(&dispatcher));
    }

    #[test]
    fn session_bootstrap_flag() {
        let dispatcher = HttpCollectDispatcher::new("collect", "https://collect.example.com/e")
            .with_session_bootstrap();
        assert!(Dispatcher::requires_session_bootstrap(&dispatcher));
    }

    #[test]
    fn collect_dispatcher_with_custom_client() {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap();
        let dispatcher = HttpCollectDispatcher::new("collect", "https://collect.example.com/e")
            .with_client(client);
        assert_eq!(Dispatcher::name(&dispatcher), "collect");
    }
}
