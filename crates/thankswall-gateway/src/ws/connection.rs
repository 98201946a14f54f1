use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thankswall_core::ConnId;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::send::{FrameSink, SendError, WsSink};

/// Subscriber connection states. Linear progression, no backwards transitions.
/// A reconnecting client gets a new `Connection` with a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Closed,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnState::Connecting,
            1 => ConnState::Open,
            _ => ConnState::Closed,
        }
    }
}

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame received or the stream ended.
    PeerClosed,
    /// The inbound side errored; treated the same as a close.
    ReadError,
    /// A broadcast write failed or timed out.
    WriteFailed,
    /// The heartbeat ping could not be written.
    HeartbeatFailed,
    /// Marked closed from outside the session (broadcast failure, shutdown).
    Released,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::ReadError => "read_error",
            CloseReason::WriteFailed => "write_failed",
            CloseReason::HeartbeatFailed => "heartbeat_failed",
            CloseReason::Released => "released",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// One subscriber: an id, the outbound sink, and its lifecycle state.
pub struct Connection {
    id: ConnId,
    sink: Arc<dyn FrameSink>,
    state: AtomicU8,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(sink: Arc<dyn FrameSink>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnId::new(),
            sink,
            state: AtomicU8::new(ConnState::Connecting as u8),
            closed: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &ConnId {
        &self.id
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    /// `Connecting → Open`. False if the connection already moved on.
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnState::Connecting as u8,
                ConnState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closed` and wake the connection's own loop. True only for
    /// the call that performed the transition.
    pub fn mark_closed(&self) -> bool {
        let prev = self.state.swap(ConnState::Closed as u8, Ordering::AcqRel);
        self.closed.cancel();
        prev != ConnState::Closed as u8
    }

    /// Resolves once the connection has been marked closed from any path.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    pub async fn send_text(&self, text: &str) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        self.sink.send_text(text).await
    }

    async fn send_ping(&self) -> Result<(), SendError> {
        self.sink.send_ping().await
    }
}

/// Timing knobs for one subscriber session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTiming {
    pub heartbeat: Duration,
    pub write_timeout: Duration,
}

/// Axum handler: upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let sessions = state.sessions.clone();
    ws.max_message_size(state.config.limits.max_ws_frame_bytes)
        .on_upgrade(move |socket| sessions.track_future(run_connection(socket, state)))
}

async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let (tx, rx) = socket.split();
    let conn = Connection::new(Arc::new(WsSink::new(tx)));
    info!(conn_id = %conn.id(), "new WS connection");

    let timing = SessionTiming {
        heartbeat: Duration::from_secs(state.config.broadcast.heartbeat_secs.max(1)),
        write_timeout: Duration::from_millis(state.config.broadcast.write_timeout_ms),
    };
    serve_connection(conn, rx, &state.registry, timing).await;
}

/// Per-connection lifecycle. Lives for the entire subscriber session.
///
/// The upgrade has completed by the time this runs, so the connection opens
/// and registers immediately. The inbound side is read only to notice the
/// peer going away; every frame it delivers is discarded.
pub async fn serve_connection<S>(
    conn: Arc<Connection>,
    mut inbound: S,
    registry: &ConnectionRegistry,
    timing: SessionTiming,
) -> CloseReason
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    if !conn.mark_open() || !registry.register(Arc::clone(&conn)) {
        warn!(conn_id = %conn.id(), "connection could not be opened");
        registry.release(&conn, CloseReason::Shutdown);
        conn.sink.close().await;
        return CloseReason::Shutdown;
    }
    debug!(conn_id = %conn.id(), subscribers = registry.len(), "subscriber registered");

    let start = tokio::time::Instant::now() + timing.heartbeat;
    let mut tick = tokio::time::interval_at(start, timing.heartbeat);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let reason = loop {
        tokio::select! {
            msg = inbound.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break CloseReason::PeerClosed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(conn_id = %conn.id(), error = %e, "inbound read failed");
                        break CloseReason::ReadError;
                    }
                }
            }

            _ = tick.tick() => {
                match tokio::time::timeout(timing.write_timeout, conn.send_ping()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(conn_id = %conn.id(), error = %e, "heartbeat failed");
                        break CloseReason::HeartbeatFailed;
                    }
                    Err(_) => {
                        debug!(conn_id = %conn.id(), "heartbeat timed out");
                        break CloseReason::HeartbeatFailed;
                    }
                }
            }

            _ = conn.closed() => break CloseReason::Released,
        }
    };

    registry.release(&conn, reason);
    if tokio::time::timeout(timing.write_timeout, conn.sink.close())
        .await
        .is_err()
    {
        debug!(conn_id = %conn.id(), "close frame timed out");
    }
    info!(conn_id = %conn.id(), reason = %reason, "WS connection closed");
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::send::testing::RecordingSink;
    use tokio::sync::mpsc;

    type Inbound = Result<Message, axum::Error>;

    fn inbound() -> (
        mpsc::UnboundedSender<Inbound>,
        impl Stream<Item = Inbound> + Unpin,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        (tx, futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }

    fn timing() -> SessionTiming {
        SessionTiming {
            heartbeat: Duration::from_secs(3600),
            write_timeout: Duration::from_millis(200),
        }
    }

    fn spawn_session(
        registry: &Arc<ConnectionRegistry>,
        sink: Arc<RecordingSink>,
    ) -> (
        Arc<Connection>,
        mpsc::UnboundedSender<Inbound>,
        tokio::task::JoinHandle<CloseReason>,
    ) {
        let conn = Connection::new(sink);
        let (tx, rx) = inbound();
        let registry = Arc::clone(registry);
        let session_conn = Arc::clone(&conn);
        let handle =
            tokio::spawn(async move { serve_connection(session_conn, rx, &registry, timing()).await });
        (conn, tx, handle)
    }

    async fn wait_registered(registry: &ConnectionRegistry, n: usize) {
        for _ in 0..100 {
            if registry.len() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("registry never reached {n} members");
    }

    #[test]
    fn state_moves_forward_only() {
        let conn = Connection::new(Arc::new(RecordingSink::default()));
        assert_eq!(conn.state(), ConnState::Connecting);
        assert!(conn.mark_open());
        assert!(!conn.mark_open());
        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert!(!conn.mark_open());
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn inbound_frames_are_ignored_until_close() {
        let registry = Arc::new(ConnectionRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        let (conn, tx, handle) = spawn_session(&registry, Arc::clone(&sink));
        wait_registered(&registry, 1).await;

        tx.send(Ok(Message::Text("hello?".to_string().into()))).unwrap();
        tx.send(Ok(Message::Ping(Default::default()))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.contains(conn.id()));
        assert!(sink.frames().is_empty());

        tx.send(Ok(Message::Close(None))).unwrap();
        assert_eq!(handle.await.unwrap(), CloseReason::PeerClosed);
        assert!(registry.is_empty());
        assert_eq!(conn.state(), ConnState::Closed);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn dropped_stream_counts_as_disconnect() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_conn, tx, handle) = spawn_session(&registry, Arc::new(RecordingSink::default()));
        wait_registered(&registry, 1).await;

        drop(tx);
        assert_eq!(handle.await.unwrap(), CloseReason::PeerClosed);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn read_error_tears_down_like_close() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_conn, tx, handle) = spawn_session(&registry, Arc::new(RecordingSink::default()));
        wait_registered(&registry, 1).await;

        tx.send(Err(axum::Error::new(std::io::Error::other("reset"))))
            .unwrap();
        assert_eq!(handle.await.unwrap(), CloseReason::ReadError);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn external_release_ends_session() {
        let registry = Arc::new(ConnectionRegistry::new());
        let sink = Arc::new(RecordingSink::default());
        let (conn, _tx, handle) = spawn_session(&registry, Arc::clone(&sink));
        wait_registered(&registry, 1).await;

        assert!(registry.release(&conn, CloseReason::WriteFailed));
        assert_eq!(handle.await.unwrap(), CloseReason::Released);
        assert!(sink.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_heartbeat_tears_down() {
        let registry = Arc::new(ConnectionRegistry::new());
        let conn = Connection::new(Arc::new(RecordingSink::failing()));
        let (_tx, rx) = inbound();
        let timing = SessionTiming {
            heartbeat: Duration::from_secs(30),
            write_timeout: Duration::from_secs(1),
        };

        let reason = serve_connection(Arc::clone(&conn), rx, &registry, timing).await;
        assert_eq!(reason, CloseReason::HeartbeatFailed);
        assert!(registry.is_empty());
    }
}
