//! Inbound half of the ingest → display hand-off: POST /notify
//!
//! Request:  the flat event `data` object (no `type` wrapper)
//! Response: `{"status": "broadcasted"}`
//! Error:    400 `{"error": "..."}` when the body is not a well-formed event
//!
//! Nothing is stored here and business rules are not re-checked; the ingest
//! side validated and persisted the event before calling.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;
use thankswall_core::EventEnvelope;
use thankswall_protocol::frames::{EventData, NotifyAck};
use tracing::{debug, warn};

use crate::app::AppState;
use crate::error::ApiError;

pub async fn notify_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EventData>, JsonRejection>,
) -> Result<Json<NotifyAck>, ApiError> {
    let Json(data) = payload.map_err(|e| {
        warn!(error = %e.body_text(), "malformed notify body");
        ApiError::BadRequest(e.body_text())
    })?;
    let envelope = EventEnvelope::try_from(data).map_err(|e| {
        warn!(error = %e, "notify body failed shape check");
        ApiError::BadRequest(e.to_string())
    })?;

    // ack as soon as the event is queued
    if !state.broadcasts.submit(envelope) {
        return Err(ApiError::Internal("broadcast worker stopped".to_string()));
    }
    debug!("notify queued for broadcast");
    Ok(Json(NotifyAck::broadcasted()))
}
