use thiserror::Error;

/// Errors that can occur during dispatch pipeline operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// An error occurred in the storage backend.
    #[error("state error: {0}")]
    State(#[from] beacon_state::StateError),

    /// An error from a delivery transport.
    #[error("transport error: {0}")]
    Transport(#[from] beacon_transport::TransportError),

    /// A persisted entity list could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The manager was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}
