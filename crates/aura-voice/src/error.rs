//! Error types for the conversation core

use thiserror::Error;

/// Result type alias for conversation operations
pub type ConversationResult<T> = Result<T, ConversationError>;

/// Errors surfaced by the turn orchestrator and its providers.
///
/// All runtime kinds are recovered locally: the state machine collapses to
/// `idle`, the error becomes the session's single surfaced error value, and
/// the transcript is left intact. Nothing here is retried automatically.
#[derive(Error, Debug)]
pub enum ConversationError {
    /// The platform offers no speech recognition or synthesis capability.
    #[error("unsupported capability: {0}")]
    Unsupported(String),

    /// Recognition failed mid-listen.
    #[error("speech capture failed: {0}")]
    Capture(String),

    /// Network error, non-success status, or malformed converse payload.
    #[error("dialogue exchange failed: {0}")]
    Exchange(String),

    /// Synthesis or playback failed.
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),
}
