//! Recent events: GET /get_messages?N_msg=20
//!
//! The non-realtime read path. Returns the newest events first in the same
//! shape as the broadcast `data` object, names unsubstituted.
//!
//! Response: `{ "messages": [ { "message": "...", ... } ] }`

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thankswall_protocol::frames::EventData;

use crate::app::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct MessagesQuery {
    #[serde(rename = "N_msg", default = "default_limit")]
    pub n_msg: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<EventData>,
}

pub async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let limit = query.n_msg.clamp(1, MAX_LIMIT);
    let store = Arc::clone(&state.store);
    let rows = tokio::task::spawn_blocking(move || store.recent(limit))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let messages = rows
        .iter()
        .map(|row| EventData::from(&row.to_envelope()))
        .collect();
    Ok(Json(MessagesResponse { messages }))
}
