//! Per-frame request dispatch
//!
//! Turns one inbound text frame into an engine call. Every failure is
//! reported on the same connection as an `error` envelope; nothing here ever
//! ends the read loop.

use std::sync::Arc;

use tracing::{debug, warn};

use super::writer::PeerWriter;
use crate::engine::{MatchingEngine, RequestContext};
use crate::error::HubError;
use crate::messages::{InboundEnvelope, Request};

/// Frame dispatcher bound to one connection
pub struct Dispatcher {
    engine: MatchingEngine,
    writer: Arc<PeerWriter>,
    address: String,
}

impl Dispatcher {
    pub fn new(engine: MatchingEngine, writer: Arc<PeerWriter>, address: impl Into<String>) -> Self {
        Self {
            engine,
            writer,
            address: address.into(),
        }
    }

    pub fn writer(&self) -> &Arc<PeerWriter> {
        &self.writer
    }

    /// Handle one text frame
    pub async fn dispatch(&self, text: &str) {
        if let Err(e) = self.handle(text).await {
            debug!(
                conn_id = self.writer.conn_id(),
                code = e.code(),
                error = %e,
                "Request failed"
            );
            if let Err(write_err) = self.writer.error(&e).await {
                warn!(
                    conn_id = self.writer.conn_id(),
                    error = %write_err,
                    "Failed to report error to client"
                );
            }
        }
    }

    async fn handle(&self, text: &str) -> Result<(), HubError> {
        let envelope = InboundEnvelope::parse(text)?;
        self.writer.set_conversation(envelope.conv.clone()).await;

        let request = Request::decode(&envelope.kind, envelope.data)?;
        debug!(
            conn_id = self.writer.conn_id(),
            kind = ?request.kind(),
            "Dispatching request"
        );

        let ctx = RequestContext::new(self.address.clone(), envelope.conv);
        let writer = self.writer.clone();

        match request {
            Request::CreateResponder(req) => {
                let registered = self.engine.register_responder(writer, req, ctx).await?;
                tokio::spawn(MatchingEngine::supervise_sweep(
                    registered.responder.name,
                    registered.sweep,
                ));
            }
            Request::CreateInitiator(req) => {
                self.engine.register_initiator(writer, req, ctx).await?;
            }
            Request::AcceptExchange(req) => {
                self.engine.accept_exchange(writer, req).await?;
            }
            Request::RejectExchange(req) => {
                self.engine.reject_exchange(writer, req).await?;
            }
            Request::DeleteResponder(req) => {
                self.engine.delete_responder(writer, req).await?;
            }
            Request::DeleteInitiator(req) => {
                self.engine.delete_initiator(writer, req).await?;
            }
        }
        Ok(())
    }
}
