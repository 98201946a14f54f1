pub mod broadcast;
pub mod connection;
pub mod registry;
pub mod send;
