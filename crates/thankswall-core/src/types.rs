use base64::Engine;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Event timestamps are recorded in UTC+8 regardless of host timezone.
pub const UPLOAD_TZ_OFFSET_SECS: i32 = 8 * 3600;

/// Current wall-clock time at the fixed UTC+8 offset.
pub fn now_utc8() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&upload_tz())
}

pub fn upload_tz() -> FixedOffset {
    // 8h is well inside the ±24h range FixedOffset accepts.
    FixedOffset::east_opt(UPLOAD_TZ_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Per-connection identifier (random UUID, not persisted).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnId(pub String);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Kind tag carried on every broadcast frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    NewMessage,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewMessage => "new_message",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingested event on its way to subscribers.
///
/// Fields are private: once built the envelope is read-only. `has_image` is
/// derived from the payload, so the two can never disagree.
///
/// Name fields keep their raw values. An empty `user_name` stays empty here;
/// substituting [`crate::config::DISPLAY_DEFAULT_NAME`] is the renderer's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    kind: EventKind,
    message: String,
    user_name: String,
    group_name: String,
    event_tag: String,
    upload_time: DateTime<FixedOffset>,
    image_base64: Option<String>,
}

impl EventEnvelope {
    pub fn new_message(message: impl Into<String>, upload_time: DateTime<FixedOffset>) -> Self {
        Self {
            kind: EventKind::NewMessage,
            message: message.into(),
            user_name: String::new(),
            group_name: String::new(),
            event_tag: String::new(),
            upload_time,
            image_base64: None,
        }
    }

    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = user_name.into();
        self
    }

    pub fn with_group_name(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = group_name.into();
        self
    }

    pub fn with_event_tag(mut self, event_tag: impl Into<String>) -> Self {
        self.event_tag = event_tag.into();
        self
    }

    /// Attach raw image bytes; they are base64-encoded here, once.
    pub fn with_image_bytes(mut self, bytes: &[u8]) -> Self {
        self.image_base64 = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        self
    }

    /// Attach an already-encoded payload (bridge receiving side).
    pub fn with_image_base64(mut self, encoded: impl Into<String>) -> Self {
        self.image_base64 = Some(encoded.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn event_tag(&self) -> &str {
        &self.event_tag
    }

    pub fn upload_time(&self) -> DateTime<FixedOffset> {
        self.upload_time
    }

    pub fn has_image(&self) -> bool {
        self.image_base64.is_some()
    }

    pub fn image_base64(&self) -> Option<&str> {
        self.image_base64.as_deref()
    }
}

/// Substitute the display default for an empty name field.
pub fn display_or_default(raw: &str) -> &str {
    if raw.trim().is_empty() {
        crate::config::DISPLAY_DEFAULT_NAME
    } else {
        raw
    }
}
