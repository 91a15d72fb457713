//! Responder preview handler

use std::sync::Arc;

use axum::{Json, extract::State};

use super::super::state::AppState;
use super::super::types::{ApiResponse, RespondersData};

/// GET /responders
///
/// Lists registered responders (never their keys) with directory counts.
/// Not gated by the hub secret.
pub async fn list_responders(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<RespondersData>> {
    let stats = state.engine.stats();
    Json(ApiResponse::success(RespondersData {
        responders: state.engine.list_responders(),
        pending_initiators: stats.pending_initiators,
        exchanges: stats.exchanges,
    }))
}
