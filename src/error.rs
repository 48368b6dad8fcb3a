//! Error types for the Lantern companion

use thiserror::Error;

/// Result type alias for Lantern operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Persona not found or invalid
    #[error("persona error: {0}")]
    Persona(String),

    /// Audio device or stream failure; ends the owning session
    #[error("capture error: {0}")]
    Capture(String),

    /// Audio processing error (decode, resample, WAV encode)
    #[error("audio error: {0}")]
    Audio(String),

    /// STT rejected or garbled the utterance; the utterance is dropped
    #[error("transcription error: {0}")]
    Transcription(String),

    /// STT backend unreachable or overloaded; retried with backoff
    #[error("STT unavailable: {0}")]
    SttUnavailable(String),

    /// Chat backend returned 429; retried once then answered with a fallback
    #[error("backend rate limited: {0}")]
    RateLimited(String),

    /// Chat backend unreachable; answered with a fallback line
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Chat backend reply could not be parsed or was empty
    #[error("malformed backend reply: {0}")]
    Malformed(String),

    /// TTS failure; falls through to the next synthesis backend
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Another session already owns the requested device or channel
    #[error("resource conflict: {0}")]
    ResourceConflict(String),

    /// Session lifecycle violation (command in the wrong state)
    #[error("session error: {0}")]
    Session(String),

    /// Voice channel link error
    #[error("channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the turn should be retried once before falling back
    #[must_use]
    pub const fn is_retryable_turn(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}
