use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use socket_forwarding::ReconnectPolicy;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [forwarding]
//                    reconnect_delay_ms = 500
//
//   env var:         BRIDGE_FORWARDING__RECONNECT_DELAY_MS=500   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub forwarding: ForwardingFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// 0 = auto-select
    #[serde(default)]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
        }
    }
}

/// Socket forwarding tunables (lives under `[forwarding]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForwardingFileConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,
    /// How long a forwarded message may wait for its socket to open.
    /// 0 = wait forever.
    #[serde(default)]
    pub open_timeout_ms: u64,
}

impl Default for ForwardingFileConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
            liveness_interval_ms: default_liveness_interval_ms(),
            open_timeout_ms: 0,
        }
    }
}

/// Values reported to the panel on load (lives under `[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_machine_id")]
    pub machine_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub workspace_path: Option<PathBuf>,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            machine_id: default_machine_id(),
            session_id: None,
            workspace_path: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_liveness_interval_ms() -> u64 {
    1000
}
fn default_api_url() -> String {
    "http://127.0.0.1:65432".to_string()
}

pub fn default_machine_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "local".to_string())
}

/// Build a figment that layers: defaults → config.toml → BRIDGE_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `BRIDGE_SERVER__PORT=7000`  →  `server.port = 7000`
///   `BRIDGE_SESSION__API_URL=...`  →  `session.api_url = ...`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("BRIDGE_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Self {
        Self {
            host: fc.host.clone(),
            port: fc.port,
        }
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

/// Reconnect timing plus the implicit-open bound for each panel's registry.
#[derive(Clone, Debug)]
pub struct ForwardingConfig {
    pub policy: ReconnectPolicy,
    /// `None` waits indefinitely
    pub open_timeout: Option<Duration>,
}

/// Timer intervals below this would spin the reconnect and liveness loops.
const MIN_INTERVAL_MS: u64 = 1;

impl ForwardingConfig {
    pub fn from_file(fc: &ForwardingFileConfig) -> Self {
        Self {
            policy: ReconnectPolicy {
                reconnect_delay: interval_ms("reconnect_delay_ms", fc.reconnect_delay_ms),
                liveness_interval: interval_ms("liveness_interval_ms", fc.liveness_interval_ms),
            },
            open_timeout: if fc.open_timeout_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(fc.open_timeout_ms))
            },
        }
    }
}

fn interval_ms(name: &str, ms: u64) -> Duration {
    if ms < MIN_INTERVAL_MS {
        warn!(setting = name, "interval of {}ms is too short; using {}ms", ms, MIN_INTERVAL_MS);
    }
    Duration::from_millis(ms.max(MIN_INTERVAL_MS))
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub api_url: String,
    pub machine_id: String,
    /// Opaque; generated once per process when not configured
    pub session_id: String,
    pub workspace_path: PathBuf,
}

impl SessionConfig {
    pub fn from_file(fc: &SessionFileConfig) -> Result<Self> {
        let workspace_path = match &fc.workspace_path {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("Failed to resolve working directory")?,
        };
        Ok(Self {
            api_url: fc.api_url.clone(),
            machine_id: fc.machine_id.clone(),
            session_id: fc
                .session_id
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            workspace_path,
        })
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl BridgeConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".panel-bridge"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        info!("Using data directory: {}", data_dir.display());

        Ok(Self { data_dir, logs_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.logs_dir.join("bridge.log")
    }
}
