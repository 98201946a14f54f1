use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use thankswall_core::config::{ThankswallConfig, TopologyMode, NOTIFY_PATH, SUBSCRIBE_PATH};
use thankswall_store::EventStore;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::bridge::{BridgeClient, BridgeError};
use crate::publish::Publisher;
use crate::ws::broadcast::{BroadcastDispatcher, BroadcastQueue};
use crate::ws::connection::CloseReason;
use crate::ws::registry::ConnectionRegistry;

/// Extra time on top of the write timeout for sessions to finish closing.
const SHUTDOWN_SLACK: Duration = Duration::from_secs(1);

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ThankswallConfig,
    pub mode: TopologyMode,
    pub store: Arc<EventStore>,
    /// Open subscribers. Always present; stays empty in ingest mode.
    pub registry: Arc<ConnectionRegistry>,
    /// Feeds the broadcast worker. Used by `/notify` and local publishing.
    pub broadcasts: BroadcastQueue,
    /// Where `/upload` sends an event after persisting it.
    pub publisher: Publisher,
    /// One task per upgraded subscriber socket.
    pub sessions: TaskTracker,
}

impl AppState {
    /// Must be called inside a tokio runtime: the broadcast worker is
    /// spawned here.
    pub fn new(config: ThankswallConfig, store: EventStore) -> Result<Self, BridgeError> {
        let mode = config.topology.mode;
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcasts = BroadcastQueue::spawn(Arc::new(BroadcastDispatcher::new(
            Arc::clone(&registry),
            Duration::from_millis(config.broadcast.write_timeout_ms),
        )));
        let publisher = match mode {
            TopologyMode::Ingest => Publisher::Bridge(BridgeClient::new(
                config.bridge.notify_url(),
                Duration::from_millis(config.bridge.timeout_ms),
            )?),
            TopologyMode::Single | TopologyMode::Display => Publisher::Local(broadcasts.clone()),
        };

        Ok(Self {
            config,
            mode,
            store: Arc::new(store),
            registry,
            broadcasts,
            publisher,
            sessions: TaskTracker::new(),
        })
    }

    /// Release every subscriber and wait for their sessions to send close
    /// frames. Returns how many subscribers were released.
    pub async fn shutdown(&self) -> usize {
        let released = self.registry.release_all(CloseReason::Shutdown);
        self.sessions.close();
        let grace = Duration::from_millis(self.config.broadcast.write_timeout_ms) + SHUTDOWN_SLACK;
        if tokio::time::timeout(grace, self.sessions.wait()).await.is_err() {
            warn!(pending = self.sessions.len(), "subscriber sessions still closing at shutdown");
        } else {
            info!(released, "subscriber sessions closed");
        }
        released
    }
}

/// Assemble the router for this process's topology role.
///
/// single:  / /health /ws /upload /get_messages
/// ingest:  / /health /upload
/// display: / /health /ws /notify /get_messages
pub fn build_router(state: Arc<AppState>) -> Router {
    let mode = state.mode;
    let mut router = Router::new()
        .route("/", get(crate::http::health::index_handler))
        .route("/health", get(crate::http::health::health_handler));

    if mode.accepts_uploads() {
        router = router.route(
            "/upload",
            post(crate::http::upload::upload_handler)
                .layer(DefaultBodyLimit::max(state.config.limits.max_upload_bytes)),
        );
    }
    if mode.serves_subscribers() {
        router = router
            .route(SUBSCRIBE_PATH, get(crate::ws::connection::ws_handler))
            .route(
                "/get_messages",
                get(crate::http::messages::messages_handler),
            );
    }
    if mode == TopologyMode::Display {
        router = router.route(NOTIFY_PATH, post(crate::http::notify::notify_handler));
    }

    router
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
