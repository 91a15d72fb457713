//! Registration records, exchange records and delivery payloads.
//!
//! `Responder`, `Initiator` and `Exchange` are owned by the directory.
//! `Offer`, `Answer` and `FailedOffer` are produced by the matching engine
//! and only live long enough to be delivered.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core_types::{ExchangeId, PeerName};
use crate::websocket::writer::PeerWriter;

/// Management-key policy shared by every overwrite and delete.
///
/// A blank stored key leaves the entry open to anyone; a non-blank stored
/// key requires an exact match.
pub fn management_key_authorizes(stored: &str, presented: &str) -> bool {
    stored.is_empty() || stored == presented
}

/// Named endpoint that answers matched offers
#[derive(Debug, Clone)]
pub struct Responder {
    pub name: PeerName,
    /// Empty set means open to any initiator
    pub access_keys: BTreeSet<String>,
    pub management_key: String,
    pub description: String,
    /// Remote address of the registering connection
    pub address: String,
    /// Conversation of the registration message, used to correlate offers
    pub conversation: Option<String>,
    pub writer: Arc<PeerWriter>,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Responder {
    /// True iff `access_keys` is empty or contains `key`
    pub fn access_key_matches(&self, key: &str) -> bool {
        self.access_keys.is_empty() || self.access_keys.contains(key)
    }

    pub fn management_key_matches(&self, key: &str) -> bool {
        management_key_authorizes(&self.management_key, key)
    }

    pub fn is_protected(&self) -> bool {
        !self.access_keys.is_empty()
    }

    pub fn preview(&self) -> ResponderPreview {
        ResponderPreview {
            name: self.name.to_string(),
            protected: self.is_protected(),
            description: self.description.clone(),
            address: self.address.clone(),
            last_seen_at: self.last_seen_at,
        }
    }
}

/// Named endpoint asking to be matched with one responder
#[derive(Debug, Clone)]
pub struct Initiator {
    pub name: PeerName,
    pub target: PeerName,
    pub target_access_key: String,
    pub management_key: String,
    pub sdp: String,
    pub address: String,
    /// Conversation of the registration message, used to correlate the answer
    pub conversation: Option<String>,
    pub writer: Arc<PeerWriter>,
    pub ignore_if_target_missing: bool,
    pub created_at: DateTime<Utc>,
}

impl Initiator {
    pub fn management_key_matches(&self, key: &str) -> bool {
        management_key_authorizes(&self.management_key, key)
    }
}

/// One matched (initiator, responder) pair awaiting an answer or a reject.
///
/// Both parties are snapshots taken at match time. Never updated after
/// creation.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub id: ExchangeId,
    pub initiator: Initiator,
    pub responder: Responder,
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(initiator: Initiator, responder: Responder) -> Self {
        Self {
            id: ExchangeId::new(),
            initiator,
            responder,
            created_at: Utc::now(),
        }
    }

    pub fn offer(&self) -> Offer {
        Offer {
            id: self.id,
            initiator: self.initiator.name.to_string(),
            responder: self.responder.name.to_string(),
            sdp: self.initiator.sdp.clone(),
        }
    }

    pub fn answer(&self, sdp: String) -> Answer {
        Answer {
            id: Uuid::new_v4().to_string(),
            exchange_id: self.id,
            responder: self.responder.name.to_string(),
            sdp,
        }
    }
}

/// Initiator's session description, delivered to the responder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Offer {
    pub id: ExchangeId,
    pub initiator: String,
    pub responder: String,
    pub sdp: String,
}

/// Responder's session description, delivered to the initiator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub id: String,
    #[serde(rename = "exchangeid")]
    pub exchange_id: ExchangeId,
    pub responder: String,
    pub sdp: String,
}

/// Match attempt that did not produce an exchange. Reported, never retried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedOffer {
    pub initiator: String,
    pub responder: String,
    pub reason: String,
    pub code: String,
}

/// Read-only view of a responder for the HTTP preview endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponderPreview {
    pub name: String,
    pub protected: bool,
    pub description: String,
    pub address: String,
    pub last_seen_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::websocket::writer::MemorySink;

    pub fn responder(name: &str, keys: &[&str], mgmt: &str) -> (Responder, Arc<MemorySink>) {
        let (writer, sink) = MemorySink::writer(1);
        let now = Utc::now();
        let r = Responder {
            name: PeerName::new("name", name).unwrap(),
            access_keys: keys.iter().map(|k| k.to_string()).collect(),
            management_key: mgmt.to_string(),
            description: String::new(),
            address: "127.0.0.1:1000".to_string(),
            conversation: None,
            writer,
            registered_at: now,
            last_seen_at: now,
        };
        (r, sink)
    }

    pub fn initiator(
        name: &str,
        target: &str,
        key: &str,
        mgmt: &str,
    ) -> (Initiator, Arc<MemorySink>) {
        let (writer, sink) = MemorySink::writer(2);
        let i = Initiator {
            name: PeerName::new("name", name).unwrap(),
            target: PeerName::new("targetname", target).unwrap(),
            target_access_key: key.to_string(),
            management_key: mgmt.to_string(),
            sdp: format!("sdp-of-{name}"),
            address: "127.0.0.1:2000".to_string(),
            conversation: None,
            writer,
            ignore_if_target_missing: false,
            created_at: Utc::now(),
        };
        (i, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_access_key_open_responder() {
        let (r, _) = responder("alice", &[], "");
        assert!(r.access_key_matches(""));
        assert!(r.access_key_matches("anything"));
        assert!(!r.is_protected());
    }

    #[test]
    fn test_access_key_protected_responder() {
        let (r, _) = responder("alice", &["k1", "k2"], "");
        assert!(r.access_key_matches("k1"));
        assert!(r.access_key_matches("k2"));
        assert!(!r.access_key_matches("k3"));
        assert!(!r.access_key_matches(""));
        assert!(r.is_protected());
    }

    #[test]
    fn test_management_key_policy() {
        assert!(management_key_authorizes("", ""));
        assert!(management_key_authorizes("", "whatever"));
        assert!(management_key_authorizes("m1", "m1"));
        assert!(!management_key_authorizes("m1", ""));
        assert!(!management_key_authorizes("m1", "m2"));
    }

    #[test]
    fn test_exchange_snapshots_parties() {
        let (r, _) = responder("alice", &[], "");
        let (i, _) = initiator("bob", "alice", "", "");
        let e = Exchange::new(i, r);

        let offer = e.offer();
        assert_eq!(offer.id, e.id);
        assert_eq!(offer.initiator, "bob");
        assert_eq!(offer.responder, "alice");
        assert_eq!(offer.sdp, "sdp-of-bob");

        let answer = e.answer("answer-sdp".into());
        assert_eq!(answer.exchange_id, e.id);
        assert_eq!(answer.responder, "alice");
        assert_ne!(answer.id, e.id.to_string());
    }

    #[test]
    fn test_preview() {
        let (r, _) = responder("alice", &["k1"], "m");
        let p = r.preview();
        assert_eq!(p.name, "alice");
        assert!(p.protected);
        assert_eq!(p.address, "127.0.0.1:1000");
    }
}
