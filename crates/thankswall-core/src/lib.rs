pub mod config;
pub mod error;
pub mod types;

pub use error::{Result, ThankswallError};
pub use types::{ConnId, EventEnvelope, EventKind};
