pub mod handlers;
pub mod state;
pub mod types;

use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::HubConfig;
use crate::directory::InMemoryDirectory;
use crate::engine::MatchingEngine;
use crate::websocket::{WriterCache, ws_handler};
use state::AppState;

/// Build the hub router
///
/// - `GET /hub` WebSocket upgrade (secret-gated)
/// - `GET /responders` responder previews
/// - `GET /health` liveness
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/hub", get(ws_handler))
        .route("/responders", get(handlers::list_responders))
        .route("/health", get(handlers::health_check))
        .with_state(state)
}

/// Engine over a fresh in-memory directory
pub fn new_engine() -> MatchingEngine {
    MatchingEngine::new(
        Arc::new(InMemoryDirectory::new()),
        Arc::new(WriterCache::new()),
    )
}

/// Bind the configured address
pub async fn bind(config: &HubConfig) -> std::io::Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);
    TcpListener::bind(&addr).await
}

/// Serve the hub on an already-bound listener until `shutdown` resolves
pub async fn run_server<F>(
    listener: TcpListener,
    config: &HubConfig,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(AppState::new(new_engine(), config.master_password.clone()));
    let app = router(state);

    let local = listener.local_addr()?;
    tracing::info!(
        addr = %local,
        protected = !config.master_password.is_empty(),
        "Hub listening"
    );
    tracing::info!("WebSocket endpoint: ws://{}/hub", local);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
