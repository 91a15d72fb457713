//! Core type definitions shared by every layer of the hub.
//!
//! - [`Role`] - which namespace a name lives in
//! - [`PeerName`] - validated registration name
//! - [`ExchangeId`] - opaque, never-reused exchange identifier
//! - [`ConnectionId`] - process-local id of one live connection

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique connection identifier (process-local, monotonically increasing)
pub type ConnectionId = u64;

/// Maximum accepted length of a peer name
pub const MAX_NAME_LEN: usize = 128;

/// Maximum accepted size of one SDP payload in bytes
pub const MAX_SDP_LEN: usize = 64 * 1024;

/// Maximum number of access keys a responder may register
pub const MAX_ACCESS_KEYS: usize = 64;

/// The two namespaces a name can be registered in.
///
/// A responder and an initiator may share a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Responder,
    Initiator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Responder => write!(f, "responder"),
            Role::Initiator => write!(f, "initiator"),
        }
    }
}

/// Validation errors for names and payload sizes
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("Invalid length for {field}: expected at most {max}, got {actual}")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("{field} must not contain control characters")]
    ControlCharacters { field: &'static str },
}

/// Validated peer name
///
/// Trimmed, non-empty, at most [`MAX_NAME_LEN`] bytes, no control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PeerName(String);

impl PeerName {
    pub fn new(field: &'static str, name: &str) -> Result<Self, ValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::Empty { field });
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ValidationError::TooLong {
                field,
                max: MAX_NAME_LEN,
                actual: name.len(),
            });
        }
        if name.chars().any(char::is_control) {
            return Err(ValidationError::ControlCharacters { field });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check an SDP payload against the size limit
pub fn validate_sdp(sdp: &str) -> Result<(), ValidationError> {
    if sdp.len() > MAX_SDP_LEN {
        return Err(ValidationError::TooLong {
            field: "sdp",
            max: MAX_SDP_LEN,
            actual: sdp.len(),
        });
    }
    Ok(())
}

/// Opaque exchange identifier
///
/// Backed by a random UUID, so ids are never reused within or across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id received from a client
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Fresh conversation id for a write that has no correlation of its own
pub fn new_conversation_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_name_trims() {
        let name = PeerName::new("name", "  alice ").unwrap();
        assert_eq!(name.as_str(), "alice");
    }

    #[test]
    fn test_peer_name_rejects_empty() {
        assert_eq!(
            PeerName::new("name", "   "),
            Err(ValidationError::Empty { field: "name" })
        );
    }

    #[test]
    fn test_peer_name_rejects_long() {
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            PeerName::new("name", &long),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_peer_name_rejects_control_chars() {
        assert!(PeerName::new("name", "al\nice").is_err());
    }

    #[test]
    fn test_exchange_ids_are_unique() {
        let a = ExchangeId::new();
        let b = ExchangeId::new();
        assert_ne!(a, b);
        assert_eq!(ExchangeId::parse(&a.to_string()), Some(a));
        assert_eq!(ExchangeId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_sdp_limit() {
        assert!(validate_sdp("v=0").is_ok());
        assert!(validate_sdp(&"x".repeat(MAX_SDP_LEN + 1)).is_err());
    }
}
