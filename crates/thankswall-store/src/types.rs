use chrono::{DateTime, FixedOffset};
use thankswall_core::EventEnvelope;

/// A validated submission, ready to persist.
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub message: String,
    pub user_name: String,
    pub group_name: String,
    pub event: String,
    /// Raw image bytes, only set once the upload passed image sniffing.
    pub image: Option<Vec<u8>>,
}

/// A persisted event row.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: i64,
    pub message: String,
    pub user_name: String,
    pub group_name: String,
    pub event: String,
    pub upload_time: DateTime<FixedOffset>,
    pub image: Option<Vec<u8>>,
}

impl StoredEvent {
    /// Build the broadcast envelope for this row. `upload_time` is carried
    /// over as stored, never recomputed.
    pub fn to_envelope(&self) -> EventEnvelope {
        let envelope = EventEnvelope::new_message(self.message.clone(), self.upload_time)
            .with_user_name(self.user_name.clone())
            .with_group_name(self.group_name.clone())
            .with_event_tag(self.event.clone());
        match &self.image {
            Some(bytes) => envelope.with_image_bytes(bytes),
            None => envelope,
        }
    }
}
