use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thankswall_core::{EventEnvelope, EventKind};
use thiserror::Error;

/// Server → subscriber push.
/// Wire: `{ "type": "new_message", "data": { "message": "...", ... } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastFrame {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: EventData,
}

impl From<&EventEnvelope> for BroadcastFrame {
    fn from(envelope: &EventEnvelope) -> Self {
        Self {
            kind: envelope.kind(),
            data: EventData::from(envelope),
        }
    }
}

/// Event body. Used as the broadcast `data` object, as the flat `/notify`
/// request body, and as a row in the recent-events listing.
///
/// Wire: `{ "message": "...", "user_name": "", "group_name": "", "event": "",
///          "upload_time": "2025-11-27T19:30:00+08:00", "has_image": true, "image": "<b64>" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub message: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub group_name: String,
    #[serde(default)]
    pub event: String,
    pub upload_time: DateTime<FixedOffset>,
    pub has_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl From<&EventEnvelope> for EventData {
    fn from(envelope: &EventEnvelope) -> Self {
        Self {
            message: envelope.message().to_string(),
            user_name: envelope.user_name().to_string(),
            group_name: envelope.group_name().to_string(),
            event: envelope.event_tag().to_string(),
            upload_time: envelope.upload_time(),
            has_image: envelope.has_image(),
            image: envelope.image_base64().map(str::to_string),
        }
    }
}

/// Structural problems with an inbound event body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("has_image is true but no image payload was sent")]
    MissingImage,

    #[error("image payload sent with has_image=false")]
    UnexpectedImage,
}

impl TryFrom<EventData> for EventEnvelope {
    type Error = ShapeError;

    /// Only the image/has_image pairing is checked here. Business rules such
    /// as a non-empty message were enforced where the event was ingested.
    fn try_from(data: EventData) -> Result<Self, Self::Error> {
        let image = data.image.filter(|b64| !b64.is_empty());
        let envelope = EventEnvelope::new_message(data.message, data.upload_time)
            .with_user_name(data.user_name)
            .with_group_name(data.group_name)
            .with_event_tag(data.event);

        match (data.has_image, image) {
            (true, Some(b64)) => Ok(envelope.with_image_base64(b64)),
            (false, None) => Ok(envelope),
            (true, None) => Err(ShapeError::MissingImage),
            (false, Some(_)) => Err(ShapeError::UnexpectedImage),
        }
    }
}

/// Display → ingest reply to a successful `/notify`.
/// Wire: `{ "status": "broadcasted" }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyAck {
    pub status: String,
}

impl NotifyAck {
    pub fn broadcasted() -> Self {
        Self {
            status: "broadcasted".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Success,
    Failed,
}

/// Reply to `POST /upload`. `error` and `warning` are always present, `null`
/// when unset.
/// Wire: `{ "status": "success", "error": null, "warning": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: UploadStatus,
    pub error: Option<String>,
    pub warning: Option<String>,
}

impl UploadResponse {
    pub fn success(warnings: Vec<String>) -> Self {
        Self {
            status: UploadStatus::Success,
            error: None,
            warning: if warnings.is_empty() {
                None
            } else {
                Some(warnings.join("; "))
            },
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: UploadStatus::Failed,
            error: Some(error.into()),
            warning: None,
        }
    }
}
