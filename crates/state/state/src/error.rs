use thiserror::Error;

/// Errors that can occur in a storage backend.
#[derive(Debug, Error)]
pub enum StateError {
    /// The backend could not read or write the underlying medium.
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backend is not writable (e.g. device storage exhausted).
    #[error("storage not writable")]
    NotWritable,
}
