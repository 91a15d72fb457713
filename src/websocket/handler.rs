//! WebSocket handler for hub connections
//!
//! Handles the upgrade (shared-secret check), connection lifecycle, and
//! frame dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    Json,
    extract::{ConnectInfo, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::writer::{Outbound, PeerWriter, WsSink};
use crate::engine::MatchingEngine;
use crate::gateway::state::AppState;
use crate::gateway::types::ApiResponse;

/// WebSocket connection query parameters
#[derive(Debug, Deserialize)]
pub struct HubQuery {
    #[serde(default)]
    pub secret: Option<String>,
}

/// WebSocket upgrade handler
///
/// Endpoint: GET /hub?secret=...
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HubQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !state.secret_matches(params.secret.as_deref()) {
        warn!(%addr, "Hub upgrade refused: invalid secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error(401, "invalid secret")),
        )
            .into_response();
    }

    let engine = state.engine.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, addr, engine))
}

/// Handle WebSocket connection lifecycle
async fn handle_socket(socket: WebSocket, addr: SocketAddr, engine: MatchingEngine) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    let conn_id = engine.writers().next_connection_id();
    let writer = Arc::new(PeerWriter::new(conn_id, Arc::new(WsSink::new(tx))));
    info!(conn_id, %addr, "Connection opened");

    // Forward queued frames to the socket; a queued close ends the task
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let closing = matches!(outbound, Outbound::Close);
            if sender.send(WsSink::to_message(outbound)).await.is_err() || closing {
                break;
            }
        }
    });

    let dispatcher = Dispatcher::new(engine.clone(), writer, addr.to_string());
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => dispatcher.dispatch(text.as_str()).await,
                Message::Close(_) => break,
                // Ping/pong handled by axum
                _ => {}
            }
        }
        debug!(conn_id = dispatcher.writer().conn_id(), "Read loop ended");
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    // Cleanup using connection ID
    let removed = engine.writers().remove_connection(conn_id);
    info!(conn_id, %addr, removed, "Connection closed");
}
