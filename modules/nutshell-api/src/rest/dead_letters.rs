use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use tracing::info;

use crate::AppState;

pub async fn api_dead_letters(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.dead_letters().snapshot())
}

/// Re-submit every parked candidate. Candidates that fail again stay parked.
pub async fn api_replay_dead_letters(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!(parked = state.engine.dead_letters().len(), "Replaying dead letters");
    Json(state.engine.replay_dead_letters().await)
}
