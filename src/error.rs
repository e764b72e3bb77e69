//! Error types for the Hearth assistant

use std::time::Duration;

use thiserror::Error;

/// Result type alias for Hearth operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Hearth assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed create/update input, rejected locally
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown schedule entity
    #[error("not found: {0}")]
    NotFound(String),

    /// Speech, LLM, or Assist call exceeded its deadline
    #[error("{service} timed out after {}ms", .after.as_millis())]
    UpstreamTimeout {
        /// Collaborator that timed out
        service: &'static str,
        /// Deadline that was exceeded
        after: Duration,
    },

    /// Calendar feed fetch or decode failure
    #[error("calendar feed {feed}: {message}")]
    FeedSync {
        /// Feed name
        feed: String,
        /// Failure detail
        message: String,
    },

    /// Unparsable inbound command payload
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    /// Pipeline state machine received an event it cannot handle
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition {
        /// State the machine was in
        from: String,
        /// Event that was rejected
        event: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// LLM backend error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Assist pipeline error
    #[error("assist error: {0}")]
    Assist(String),

    /// Media player control error
    #[error("media player error: {0}")]
    Media(String),

    /// Real-time info provider error
    #[error("provider error: {0}")]
    Provider(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error came from an exceeded network deadline
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::UpstreamTimeout { .. } => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Run `fut` under `after`, mapping an elapsed deadline to [`Error::UpstreamTimeout`]
///
/// # Errors
///
/// Returns the future's own error, or `UpstreamTimeout` when the deadline passes
pub async fn with_timeout<T, F>(service: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(service, timeout_ms = after.as_millis(), "upstream call timed out");
            Err(Error::UpstreamTimeout { service, after })
        }
    }
}
