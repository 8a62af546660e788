//! Error types for the Chronicler runtime
//!
//! Errors are grouped by the remote surface that produces them. Each enum
//! carries a retry classification (`is_retryable`) consumed by the retrier:
//! timeouts, rate-limit responses, server errors and transport failures are
//! retryable; authentication and client errors are fatal. Mutating writes are
//! never retried regardless of classification.

use thiserror::Error;

use super::CharacterId;

/// Errors from the journey-log REST client.
#[derive(Debug, Error, Clone)]
pub enum JourneyLogError {
    #[error("character not found: {character_id}")]
    CharacterNotFound { character_id: CharacterId },

    #[error("journey-log request timed out")]
    Timeout,

    #[error("journey-log returned {status}: {body_prefix}")]
    RemoteError { status: u16, body_prefix: String },

    #[error("journey-log transport error: {0}")]
    Transport(String),

    #[error("invalid journey-log base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("failed to decode journey-log response: {0}")]
    Decode(String),
}

impl JourneyLogError {
    /// Whether the retrier may re-issue the call. Only ever consulted for
    /// idempotent reads; mutations are issued exactly once.
    pub fn is_retryable(&self) -> bool {
        match self {
            JourneyLogError::Timeout | JourneyLogError::Transport(_) => true,
            JourneyLogError::RemoteError { status, .. } => *status == 429 || *status >= 500,
            JourneyLogError::CharacterNotFound { .. }
            | JourneyLogError::InvalidBaseUrl(_)
            | JourneyLogError::Decode(_) => false,
        }
    }
}

/// Errors from the narrative model client.
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    #[error("narrative model request timed out")]
    Timeout,

    #[error("narrative model rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("narrative model authentication failed: {0}")]
    Auth(String),

    #[error("narrative model rejected the request: {0}")]
    BadRequest(String),

    #[error("narrative model does not support structured output: {0}")]
    SchemaUnsupported(String),

    #[error("narrative model returned {status}: {body_prefix}")]
    Remote { status: u16, body_prefix: String },

    #[error("narrative model transport error: {0}")]
    Transport(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::RateLimited { .. } | LlmError::Transport(_) => true,
            LlmError::Remote { status, .. } => *status >= 500,
            LlmError::Auth(_) | LlmError::BadRequest(_) | LlmError::SchemaUnsupported(_) => false,
        }
    }
}

/// Hard-stop errors that abort a turn before any write is attempted.
///
/// Soft failures (parse fallbacks, individual write failures) never surface
/// here; they are reported through the subsystem summary instead.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("turn rate limited; retry after {retry_after_seconds:.2}s")]
    RateLimited { retry_after_seconds: f64 },

    #[error("character not found: {character_id}")]
    CharacterNotFound { character_id: CharacterId },

    #[error("context fetch failed: {0}")]
    ContextFetch(JourneyLogError),

    #[error("narrative model call failed: {0}")]
    Model(LlmError),
}

impl TurnError {
    /// Stable machine-readable kind, suitable for client dispatch.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::RateLimited { .. } => "rate_limited",
            TurnError::CharacterNotFound { .. } => "character_not_found",
            TurnError::ContextFetch(_) => "context_fetch_failed",
            TurnError::Model(_) => "model_failed",
        }
    }

    /// Seconds the caller should wait before resubmitting, when known.
    pub fn retry_after_seconds(&self) -> Option<f64> {
        match self {
            TurnError::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}
