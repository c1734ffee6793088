//! Error types shared across the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine-wide error type.
///
/// Every component returns typed errors; the orchestrator converts internal
/// failures into fallbacks and the HTTP boundary maps kinds onto status
/// codes. `Transient` never reaches a caller of the per-turn pipeline.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Remote dependency timeout or network failure. Resolved locally by
    /// falling back (template response, neutral analysis).
    #[error("transient dependency failure: {0}")]
    Transient(String),

    /// Malformed request (missing call id, empty text). Not retried.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// Operation on an ended dialogue state.
    #[error("dialogue state closed: {0}")]
    StateClosed(String),

    /// Task queue at its configured bound.
    #[error("queue full: {0}")]
    QueueFull(String),

    /// Unrecoverable startup failure (missing configuration, store refuses
    /// connection). Fails startup, never a per-request error.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transient(_) => ErrorKind::Transient,
            Error::InputInvalid(_) => ErrorKind::InputInvalid,
            Error::StateClosed(_) => ErrorKind::StateClosed,
            Error::QueueFull(_) => ErrorKind::QueueFull,
            Error::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Whether the failure may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

/// Discriminant for error classification at boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    InputInvalid,
    StateClosed,
    QueueFull,
    Fatal,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::Transient("timeout".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            Error::StateClosed("call-1".into()).kind(),
            ErrorKind::StateClosed
        );
        assert!(Error::Transient("x".into()).is_retryable());
        assert!(!Error::Fatal("x".into()).is_retryable());
    }
}
