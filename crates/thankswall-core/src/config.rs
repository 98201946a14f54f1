use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_DISPLAY_URL: &str = "http://127.0.0.1:8001";
pub const BRIDGE_TIMEOUT_MS: u64 = 3_000; // one attempt, then give up
pub const WRITE_TIMEOUT_MS: u64 = 5_000; // per-connection broadcast write
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30; // server ping cadence
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024; // 20 MB form body
pub const MAX_WS_FRAME_BYTES: usize = 64 * 1024; // inbound frames are discarded anyway

pub const SUBSCRIBE_PATH: &str = "/ws";
pub const NOTIFY_PATH: &str = "/notify";

/// Shown in place of an empty name/group/event. Renderers apply it; the
/// pipeline never does.
pub const DISPLAY_DEFAULT_NAME: &str = "anonymous";

/// Top-level config (thankswall.toml + THANKSWALL_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThankswallConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Which half (or both) of the pipeline this process runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyMode {
    /// Ingestion and display in one process; uploads broadcast directly.
    #[default]
    Single,
    /// Ingestion only; uploads are forwarded to a display process over HTTP.
    Ingest,
    /// Display only; accepts forwarded events on `/notify`.
    Display,
}

impl TopologyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyMode::Single => "single",
            TopologyMode::Ingest => "ingest",
            TopologyMode::Display => "display",
        }
    }

    /// True when this process owns subscriber connections.
    pub fn serves_subscribers(&self) -> bool {
        !matches!(self, TopologyMode::Ingest)
    }

    /// True when this process accepts uploads.
    pub fn accepts_uploads(&self) -> bool {
        !matches!(self, TopologyMode::Display)
    }
}

impl std::fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TopologyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "single" => Ok(TopologyMode::Single),
            "ingest" => Ok(TopologyMode::Ingest),
            "display" => Ok(TopologyMode::Display),
            other => Err(format!("unknown topology mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub mode: TopologyMode,
}

/// Outbound notify settings used by the ingest process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the display process. `/notify` is appended.
    #[serde(default = "default_display_url")]
    pub display_url: String,
    #[serde(default = "default_bridge_timeout")]
    pub timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            display_url: default_display_url(),
            timeout_ms: BRIDGE_TIMEOUT_MS,
        }
    }
}

impl BridgeConfig {
    pub fn notify_url(&self) -> String {
        format!("{}{}", self.display_url.trim_end_matches('/'), NOTIFY_PATH)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: WRITE_TIMEOUT_MS,
            heartbeat_secs: HEARTBEAT_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_max_ws_frame")]
    pub max_ws_frame_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: MAX_UPLOAD_BYTES,
            max_ws_frame_bytes: MAX_WS_FRAME_BYTES,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_display_url() -> String {
    DEFAULT_DISPLAY_URL.to_string()
}
fn default_bridge_timeout() -> u64 {
    BRIDGE_TIMEOUT_MS
}
fn default_write_timeout() -> u64 {
    WRITE_TIMEOUT_MS
}
fn default_heartbeat() -> u64 {
    HEARTBEAT_INTERVAL_SECS
}
fn default_max_upload() -> usize {
    MAX_UPLOAD_BYTES
}
fn default_max_ws_frame() -> usize {
    MAX_WS_FRAME_BYTES
}
fn default_db_path() -> String {
    "./thankswall.db".to_string()
}

impl ThankswallConfig {
    /// Load config from a TOML file with THANKSWALL_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ./thankswall.toml
    ///
    /// A missing file is not an error; env vars and defaults still apply.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("thankswall.toml");
        Self::figment(path)
            .extract()
            .map_err(|e| crate::error::ThankswallError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("THANKSWALL_").split("__"))
    }
}
