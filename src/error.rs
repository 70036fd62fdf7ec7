//! Unified error types for the streamscribe public API.
//!
//! All fallible public API methods return `StreamResult<T>`. Model failures
//! surfaced through [`StreamError`] are fatal to the decode pass that hit
//! them, not to the session: the session logs the failure, leaves the
//! transcript ledger untouched, and stays active for subsequent audio.

use thiserror::Error;

/// The canonical error type for the streamscribe public API.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The external audio encoder failed
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// The external language model failed during a decode pass
    #[error("Decoder error: {0}")]
    Decoder(String),

    /// The tokenizer is not bound; decode passes are no-ops
    #[error("Tokenizer unavailable")]
    TokenizerUnavailable,

    /// Operation not valid in the session's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The stop task observed cancellation before completing
    #[error("Cancelled during stop")]
    CancelledDuringStop,
}

/// Result type alias for streamscribe.
pub type StreamResult<T> = Result<T, StreamError>;

impl StreamError {
    /// Create an encoder error.
    pub fn encoder(msg: impl Into<String>) -> Self {
        StreamError::Encoder(msg.into())
    }

    /// Create a decoder error.
    pub fn decoder(msg: impl Into<String>) -> Self {
        StreamError::Decoder(msg.into())
    }

    /// Create an invalid-state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        StreamError::InvalidState(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        StreamError::Config(msg.into())
    }
}
