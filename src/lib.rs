//! peer_hub - Signaling and rendezvous hub
//!
//! Initiators and responders register by name over WebSocket. The hub checks
//! the initiator's access key against the responder's allow-list, opens an
//! exchange, and relays the opaque SDP offer and answer between the two.
//!
//! # Modules
//!
//! - [`core_types`] - Names, exchange ids, payload limits
//! - [`models`] - Responder, Initiator, Exchange and delivery payloads
//! - [`messages`] - Envelope wire format and typed requests
//! - [`directory`] - Registration directory (atomic find-or-enqueue)
//! - [`engine`] - Matching engine
//! - [`websocket`] - Connection writers, cache, dispatch, upgrade handler
//! - [`gateway`] - axum router and read-only HTTP handlers

// Core types - must be first!
pub mod core_types;
pub mod error;

pub mod directory;
pub mod engine;
pub mod messages;
pub mod models;

pub mod config;
pub mod gateway;
pub mod logging;
pub mod websocket;

// Convenient re-exports at crate root
pub use core_types::{ExchangeId, PeerName, Role};
pub use directory::{DirectoryStats, DirectoryStore, InMemoryDirectory, TargetLookup};
pub use engine::{
    InitiatorOutcome, MatchOutcome, MatchingEngine, RegisteredResponder, RequestContext,
    SweepReport,
};
pub use error::HubError;
pub use messages::{Envelope, MessageType, OutboundMessage, Request};
pub use models::{Answer, Exchange, FailedOffer, Initiator, Offer, Responder, ResponderPreview};
