use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": state.mode.as_str(),
        "ws_clients": state.registry.len(),
    }))
}

/// GET /: welcome banner naming this process's role.
pub async fn index_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": "Welcome to the Thanksgiving App!",
        "role": state.mode.as_str(),
    }))
}
