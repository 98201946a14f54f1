pub mod frames;

pub use frames::{BroadcastFrame, EventData, NotifyAck, ShapeError, UploadResponse, UploadStatus};
