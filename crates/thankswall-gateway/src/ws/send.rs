use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{stream::SplitSink, SinkExt};
use thiserror::Error;
use tokio::sync::Mutex;

/// Transport-level write failure. This is the only error class that tears a
/// subscriber connection down.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection already closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound half of a subscriber channel.
///
/// Writes are serialized per sink, so a heartbeat ping can never split a
/// broadcast frame.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), SendError>;

    async fn send_ping(&self) -> Result<(), SendError>;

    /// Best effort: send a close frame and shut the write half.
    async fn close(&self);
}

/// Write half of an axum WebSocket.
pub struct WsSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsSink {
    pub fn new(tx: SplitSink<WebSocket, Message>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    async fn send(&self, msg: Message) -> Result<(), SendError> {
        let mut guard = self.tx.lock().await;
        guard
            .send(msg)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.send(Message::Text(text.to_owned().into())).await
    }

    async fn send_ping(&self) -> Result<(), SendError> {
        self.send(Message::Ping(Default::default())).await
    }

    async fn close(&self) {
        let mut guard = self.tx.lock().await;
        let _ = guard.send(Message::Close(None)).await;
        let _ = guard.close().await;
    }
}
