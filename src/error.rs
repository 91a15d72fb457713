//! Hub Error Types
//!
//! One taxonomy for every operation the matching engine exposes. Errors are
//! returned, never raised; the dispatcher turns them into `error` envelopes.

use thiserror::Error;

use crate::core_types::ValidationError;
use crate::websocket::writer::SinkError;

/// Hub error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HubError {
    /// Responder, initiator or exchange absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Access key does not match the responder's allow-list
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Management key mismatch on overwrite or delete
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed request payload
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Sink write/close failure; the affected connection is dead
    #[error("Transport error: {0}")]
    Transport(String),
}

impl HubError {
    /// Stable error code carried in outbound `error` envelopes
    pub fn code(&self) -> &'static str {
        match self {
            HubError::NotFound(_) => "NOT_FOUND",
            HubError::AccessDenied(_) => "ACCESS_DENIED",
            HubError::Conflict(_) => "CONFLICT",
            HubError::Validation(_) => "VALIDATION",
            HubError::Transport(_) => "TRANSPORT",
        }
    }
}

impl From<ValidationError> for HubError {
    fn from(e: ValidationError) -> Self {
        HubError::Validation(e.to_string())
    }
}

impl From<SinkError> for HubError {
    fn from(e: SinkError) -> Self {
        HubError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(HubError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(HubError::AccessDenied("x".into()).code(), "ACCESS_DENIED");
        assert_eq!(HubError::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(HubError::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(HubError::Transport("x".into()).code(), "TRANSPORT");
    }

    #[test]
    fn test_display() {
        let err = HubError::NotFound("exchange 42".into());
        assert_eq!(err.to_string(), "Not found: exchange 42");
    }

    #[test]
    fn test_from_sink_error() {
        let err: HubError = SinkError::Closed.into();
        assert_eq!(err.code(), "TRANSPORT");
    }
}
