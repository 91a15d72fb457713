//! WebSocket module for hub connections
//!
//! This module owns the connection side of the hub: per-connection writers,
//! the writer cache, frame dispatch, and the axum upgrade handler.

pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod writer;

pub use connection::WriterCache;
pub use dispatcher::Dispatcher;
pub use handler::ws_handler;
pub use writer::{ConnectionSink, MemorySink, PeerWriter, SinkError, WsSink};
