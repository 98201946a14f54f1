use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use thankswall_core::config::{ThankswallConfig, TopologyMode};
use thankswall_store::EventStore;
use tracing::{info, warn};

mod app;
mod bridge;
mod error;
mod http;
mod image;
mod publish;
mod ws;

#[derive(Parser)]
#[command(name = "thankswall-gateway", version, about = "Thanksgiving wall server")]
struct Cli {
    /// Path to thankswall.toml (falls back to $THANKSWALL_CONFIG)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP/WebSocket server (default)
    Serve {
        /// Override topology.mode: single, ingest or display
        #[arg(long)]
        mode: Option<TopologyMode>,
    },
    /// Create the database schema and exit
    InitDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thankswall_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > THANKSWALL_CONFIG env > ./thankswall.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("THANKSWALL_CONFIG").ok());
    let mut config = ThankswallConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ThankswallConfig::default()
    });

    match cli.command.unwrap_or(Command::Serve { mode: None }) {
        Command::InitDb => init_db(&config),
        Command::Serve { mode } => {
            if let Some(mode) = mode {
                config.topology.mode = mode;
            }
            serve(config).await
        }
    }
}

async fn serve(config: ThankswallConfig) -> anyhow::Result<()> {
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = EventStore::open(&db_path)?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = Arc::new(app::AppState::new(config, store)?);
    if state.mode == TopologyMode::Ingest {
        info!(notify_url = %state.config.bridge.notify_url(), "forwarding events to display service");
    }
    let router = app::build_router(Arc::clone(&state));

    info!(mode = %state.mode, "Thankswall gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let released = state.shutdown().await;
    info!(released, "server stopped");
    Ok(())
}

fn init_db(config: &ThankswallConfig) -> anyhow::Result<()> {
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    let conn = rusqlite::Connection::open(db_path)?;
    if thankswall_store::db::schema_exists(&conn)? {
        info!(path = %db_path, "schema already present");
    }
    // idempotent either way
    thankswall_store::db::init_db(&conn)?;
    info!(path = %db_path, "database ready");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
