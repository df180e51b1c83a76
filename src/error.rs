//! Error types for the voice interaction engine.

/// Top-level error type for the voice client core.
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    /// Speech capture / recognizer error.
    #[error("capture error: {0}")]
    Capture(String),

    /// Audio playback error (device, stream, or session).
    #[error("playback error: {0}")]
    Playback(String),

    /// Compressed audio decode error.
    #[error("decode error: {0}")]
    Decode(String),

    /// Audio source fetch error (HTTP or base64).
    #[error("source error: {0}")]
    Source(String),

    /// Duplex channel error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Conversation storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, VoiceError>;
