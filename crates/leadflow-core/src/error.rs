use thiserror::Error;

/// Top-level error type for leadflow.
#[derive(Debug, Error)]
pub enum LeadflowError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Storage error (connectivity, constraint violation, corrupt row).
    #[error("store error: {0}")]
    Store(String),

    /// Error from the outbound message transport.
    #[error("transport error: {0}")]
    Transport(String),

    /// A stage name outside the catalog.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// A referenced lead, appointment, or row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stage change the pipeline does not allow.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A malformed event (empty phone number, bad field value).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
