//! Event submission: POST /upload (multipart/form-data)
//!
//! Fields: `message` (required), `user_name`, `group_name`, `event`, `image` (file).
//! Response: `{"status": "success", "error": null, "warning": null}`
//!
//! A bad image never fails the request: the event is stored without it and
//! `warning` says so. Likewise a failed realtime notification only adds a
//! warning, since the event is already persisted by then. Only a storage
//! failure reports `status: "failed"`.

use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        State,
    },
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use thankswall_core::types::display_or_default;
use thankswall_protocol::frames::UploadResponse;
use thankswall_store::NewEvent;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::image;

pub const INVALID_IMAGE_WARNING: &str = "Uploaded file is not a valid image";

type Rejection = (StatusCode, Json<UploadResponse>);

fn reject(status: StatusCode, error: impl Into<String>) -> Rejection {
    (status, Json(UploadResponse::failed(error)))
}

#[derive(Default)]
struct UploadForm {
    message: Option<String>,
    user_name: String,
    group_name: String,
    event: String,
    image: Option<Vec<u8>>,
}

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, Rejection> {
    let multipart = multipart.map_err(|e| reject(e.status(), e.body_text()))?;
    let form = read_form(multipart).await?;

    let message = match form.message {
        Some(m) if !m.trim().is_empty() => m,
        _ => return Err(reject(StatusCode::BAD_REQUEST, "message is required")),
    };

    let mut warnings = Vec::new();
    let image = match form.image {
        Some(bytes) if !bytes.is_empty() => match image::sniff(&bytes) {
            Some(format) => {
                debug!(mime = format.mime(), size = bytes.len(), "image accepted");
                Some(bytes)
            }
            None => {
                warn!(size = bytes.len(), "uploaded file is not an image, dropping it");
                warnings.push(INVALID_IMAGE_WARNING.to_string());
                None
            }
        },
        _ => None,
    };

    let new_event = NewEvent {
        message,
        user_name: form.user_name,
        group_name: form.group_name,
        event: form.event,
        image,
    };
    let store = Arc::clone(&state.store);
    let stored = match tokio::task::spawn_blocking(move || store.insert(new_event)).await {
        Ok(Ok(stored)) => stored,
        Ok(Err(e)) => {
            error!(error = %e, "failed to store event");
            return Err(reject(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to store event: {e}"),
            ));
        }
        Err(e) => {
            error!(error = %e, "store task panicked");
            return Err(reject(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"));
        }
    };
    info!(
        id = stored.id,
        user = display_or_default(&stored.user_name),
        has_image = stored.image.is_some(),
        "event stored"
    );

    if let Some(warning) = state.publisher.publish(stored.to_envelope()).await {
        warnings.push(warning);
    }

    Ok(Json(UploadResponse::success(warnings)))
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, Rejection> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(e.status(), e.body_text()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "image" {
            let data = field
                .bytes()
                .await
                .map_err(|e| reject(e.status(), e.body_text()))?;
            form.image = Some(data.to_vec());
            continue;
        }

        let slot = match name.as_str() {
            "user_name" => &mut form.user_name,
            "group_name" => &mut form.group_name,
            "event" => &mut form.event,
            "message" => form.message.get_or_insert_with(String::new),
            other => {
                debug!(field = other, "ignoring unknown form field");
                continue;
            }
        };
        *slot = field
            .text()
            .await
            .map_err(|e| reject(e.status(), e.body_text()))?;
    }
    Ok(form)
}
