// Error types for actions-status.
// Classifies GitHub API failures into retry-soon, stop-trying and defer-until kinds.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a target can no longer be polled with its current configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PermanentCause {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("authentication failed: invalid or expired token")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("request rejected with HTTP {0}")]
    Rejected(u16),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("rate limit exhausted, resets at {}", reset_at.format("%H:%M:%S"))]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Permanent(#[from] PermanentCause),

    #[error("authorization was denied by the user")]
    AuthDenied,

    #[error("device code expired before authorization completed")]
    AuthExpired,

    #[error("device flow failed: {0}")]
    Auth(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for StatusError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            return StatusError::Permanent(PermanentCause::InvalidRequest(e.to_string()));
        }
        if e.is_timeout() {
            return StatusError::Transient(format!("request timed out: {}", e));
        }
        StatusError::Transient(e.to_string())
    }
}

impl StatusError {
    /// True for failures that should stop polling a target.
    pub fn is_permanent(&self) -> bool {
        matches!(self, StatusError::Permanent(_))
    }

    /// True for failures worth retrying at the next normal tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, StatusError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, StatusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        assert!(StatusError::Transient("boom".into()).is_transient());
        assert!(!StatusError::Transient("boom".into()).is_permanent());

        let err: StatusError = PermanentCause::Unauthorized.into();
        assert!(err.is_permanent());
        assert!(!err.is_transient());

        let limited = StatusError::RateLimited {
            reset_at: Utc::now(),
        };
        assert!(!limited.is_permanent());
        assert!(!limited.is_transient());
    }

    #[test]
    fn test_permanent_message_is_transparent() {
        let err = StatusError::from(PermanentCause::NotFound("/repos/a/b".into()));
        assert_eq!(err.to_string(), "resource not found: /repos/a/b");
    }
}
