pub mod db;
pub mod error;
pub mod manager;
pub mod types;

pub use error::StoreError;
pub use manager::EventStore;
pub use types::{NewEvent, StoredEvent};
