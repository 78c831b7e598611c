//! Error types for the voice assistant.

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Microphone or output device access was refused by the user/OS.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device exists.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The duplex connection failed to open or dropped abnormally.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound audio payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration error (missing credential, invalid config file).
    #[error("config error: {0}")]
    Config(String),

    /// Document ingestion / summarization error.
    #[error("ingest error: {0}")]
    Ingest(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;
