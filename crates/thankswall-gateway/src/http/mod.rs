pub mod health;
pub mod messages;
pub mod notify;
pub mod upload;
