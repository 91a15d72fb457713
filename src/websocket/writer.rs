//! Connection sinks and the serialized per-connection writer
//!
//! `ConnectionSink` is the write side of one live connection. `PeerWriter`
//! wraps a sink and guarantees that concurrent writers (a background match
//! sweep and the connection's own read loop) never interleave frames.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use axum::extract::ws::Message;
use tokio::sync::{Mutex, mpsc};

use crate::core_types::{ConnectionId, new_conversation_id};
use crate::error::HubError;
use crate::messages::{Envelope, ErrorMessage, InfoMessage, OutboundMessage};

/// Sink failure. Once returned, the connection is considered dead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error("connection closed")]
    Closed,

    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

/// Write side of one live connection
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Deliver one complete envelope
    async fn write(&self, envelope: Envelope) -> Result<(), SinkError>;

    /// Close the underlying connection
    async fn close(&self) -> Result<(), SinkError>;
}

/// Frames queued for a WebSocket send task
#[derive(Debug)]
pub enum Outbound {
    Frame(String),
    Close,
}

/// WebSocket sink backed by the connection's send task
///
/// Frames are pushed onto an unbounded channel drained by exactly one task,
/// so each envelope reaches the socket whole and in enqueue order.
pub struct WsSink {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl WsSink {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    /// Turn a queued frame into a WebSocket message
    pub fn to_message(outbound: Outbound) -> Message {
        match outbound {
            Outbound::Frame(text) => Message::Text(text.into()),
            Outbound::Close => Message::Close(None),
        }
    }
}

#[async_trait]
impl ConnectionSink for WsSink {
    async fn write(&self, envelope: Envelope) -> Result<(), SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        let json =
            serde_json::to_string(&envelope).map_err(|e| SinkError::Encode(e.to_string()))?;
        self.tx
            .send(Outbound::Frame(json))
            .map_err(|_| SinkError::Closed)
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.tx.send(Outbound::Close).map_err(|_| SinkError::Closed)
    }
}

/// In-memory sink that records every envelope written to it
///
/// Used by tests and by tooling that drives the engine without sockets.
#[derive(Default)]
pub struct MemorySink {
    envelopes: StdMutex<Vec<Envelope>>,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a writer over a fresh memory sink
    pub fn writer(conn_id: ConnectionId) -> (Arc<PeerWriter>, Arc<MemorySink>) {
        let sink = Arc::new(Self::new());
        let writer = Arc::new(PeerWriter::new(conn_id, sink.clone()));
        (writer, sink)
    }

    /// Make every subsequent write fail with `SinkError::Closed`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionSink for MemorySink {
    async fn write(&self, envelope: Envelope) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) || self.is_closed() {
            return Err(SinkError::Closed);
        }
        self.envelopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Serialized writer over one connection
///
/// Carries the connection's current conversation id. A write that does not
/// name a conversation uses the current one, or a fresh id if none is set.
pub struct PeerWriter {
    conn_id: ConnectionId,
    sink: Arc<dyn ConnectionSink>,
    /// Exclusive section for writes; also guards the current conversation
    conversation: Mutex<Option<String>>,
}

impl PeerWriter {
    pub fn new(conn_id: ConnectionId, sink: Arc<dyn ConnectionSink>) -> Self {
        Self {
            conn_id,
            sink,
            conversation: Mutex::new(None),
        }
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Set the conversation used to correlate the next replies
    pub async fn set_conversation(&self, conv: Option<String>) {
        *self.conversation.lock().await = conv.filter(|c| !c.is_empty());
    }

    pub async fn conversation(&self) -> Option<String> {
        self.conversation.lock().await.clone()
    }

    /// Write in the current conversation
    pub async fn write(&self, message: OutboundMessage) -> Result<(), SinkError> {
        let current = self.conversation.lock().await;
        let conv = current.clone().unwrap_or_else(new_conversation_id);
        let envelope = message
            .into_envelope(conv)
            .map_err(|e| SinkError::Encode(e.to_string()))?;
        let result = self.sink.write(envelope).await;
        drop(current);
        result
    }

    /// Write in an explicit conversation, leaving the current one untouched
    ///
    /// `None` correlates the write with a fresh id.
    pub async fn write_in(
        &self,
        conv: Option<&str>,
        message: OutboundMessage,
    ) -> Result<(), SinkError> {
        let _guard = self.conversation.lock().await;
        let conv = conv
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .unwrap_or_else(new_conversation_id);
        let envelope = message
            .into_envelope(conv)
            .map_err(|e| SinkError::Encode(e.to_string()))?;
        self.sink.write(envelope).await
    }

    pub async fn info(&self, message: impl Into<String>) -> Result<(), SinkError> {
        self.write(OutboundMessage::Info(InfoMessage {
            message: message.into(),
        }))
        .await
    }

    pub async fn error(&self, err: &HubError) -> Result<(), SinkError> {
        self.write(OutboundMessage::Error(ErrorMessage::from_error(err)))
            .await
    }

    /// Close the underlying connection
    pub async fn close(&self) -> Result<(), SinkError> {
        self.sink.close().await
    }
}

impl fmt::Debug for PeerWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerWriter")
            .field("conn_id", &self.conn_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageType;

    #[tokio::test]
    async fn test_write_uses_current_conversation() {
        let (writer, sink) = MemorySink::writer(1);
        writer.set_conversation(Some("c-1".into())).await;
        writer.info("hello").await.unwrap();

        let sent = sink.envelopes();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageType::Info);
        assert_eq!(sent[0].conv, "c-1");
        assert_eq!(sent[0].data["message"], "hello");
    }

    #[tokio::test]
    async fn test_write_without_conversation_generates_fresh_ids() {
        let (writer, sink) = MemorySink::writer(1);
        writer.info("a").await.unwrap();
        writer.info("b").await.unwrap();

        let sent = sink.envelopes();
        assert!(!sent[0].conv.is_empty());
        assert_ne!(sent[0].conv, sent[1].conv);
    }

    #[tokio::test]
    async fn test_write_in_leaves_current_conversation() {
        let (writer, sink) = MemorySink::writer(1);
        writer.set_conversation(Some("mine".into())).await;
        writer.write_in(Some("theirs"), OutboundMessage::info("x")).await.unwrap();
        writer.info("y").await.unwrap();

        let sent = sink.envelopes();
        assert_eq!(sent[0].conv, "theirs");
        assert_eq!(sent[1].conv, "mine");
        assert_eq!(writer.conversation().await.as_deref(), Some("mine"));
    }

    #[tokio::test]
    async fn test_failing_sink_reports_closed() {
        let (writer, sink) = MemorySink::writer(1);
        sink.set_failing(true);
        assert_eq!(writer.info("x").await, Err(SinkError::Closed));
        assert!(sink.envelopes().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_not_lost() {
        let (writer, sink) = MemorySink::writer(1);
        let mut handles = Vec::new();
        for i in 0..16 {
            let w = writer.clone();
            handles.push(tokio::spawn(async move { w.info(format!("m{i}")).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(sink.envelopes().len(), 16);
    }

    #[tokio::test]
    async fn test_ws_sink_queues_frames_then_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = PeerWriter::new(7, Arc::new(WsSink::new(tx)));

        writer.info("hi").await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(writer.info("late").await, Err(SinkError::Closed));

        match rx.recv().await {
            Some(Outbound::Frame(text)) => {
                let env: Envelope = serde_json::from_str(&text).unwrap();
                assert_eq!(env.kind, MessageType::Info);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(Outbound::Close)));
    }

    #[tokio::test]
    async fn test_ws_sink_fails_when_send_task_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let writer = PeerWriter::new(7, Arc::new(WsSink::new(tx)));
        assert_eq!(writer.info("x").await, Err(SinkError::Closed));
    }
}
