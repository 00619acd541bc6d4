use thiserror::Error;

/// Top-level error type for Concierge.
#[derive(Debug, Error)]
pub enum ConciergeError {
    /// Error from the messaging channel (delivery or inbound stream).
    #[error("channel error: {0}")]
    Channel(String),

    /// Error from a responder or generative provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Storage error (block list, backlog, survey results, settings).
    #[error("store error: {0}")]
    Store(String),

    /// Speech-to-text failure.
    #[error("transcription error: {0}")]
    Transcription(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
