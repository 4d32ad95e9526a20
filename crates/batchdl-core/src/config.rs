use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::AllowedConnection;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per file transfer (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

/// Which built-in progress throttle batches use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ThrottleConfig {
    /// At most one progress update per `interval_ms`.
    Time { interval_ms: u64 },
    /// An update whenever the whole-number percentage increases.
    Progress,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        ThrottleConfig::Progress
    }
}

/// Global configuration loaded from `~/.config/batchdl/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchdlConfig {
    /// Run the files of a batch concurrently instead of one after another.
    #[serde(default)]
    pub concurrent_file_downloading: bool,
    /// Upper bound on parallel file transfers within one batch (concurrent mode).
    pub max_parallel_files: usize,
    /// Upper bound on batches downloading at the same time.
    pub max_parallel_batches: usize,
    /// Connection type downloads are allowed on.
    #[serde(default)]
    pub allowed_connection: AllowedConnection,
    /// Progress callback throttle.
    #[serde(default)]
    pub callback_throttle: ThrottleConfig,
    /// Minimum interval between durable progress writes of a transferring file.
    pub persist_interval_ms: u64,
    /// Free space kept in reserve on top of the remaining bytes of a batch.
    #[serde(default)]
    pub storage_reserve_bytes: Option<u64>,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for BatchdlConfig {
    fn default() -> Self {
        Self {
            concurrent_file_downloading: false,
            max_parallel_files: 3,
            max_parallel_batches: 2,
            allowed_connection: AllowedConnection::Any,
            callback_throttle: ThrottleConfig::Progress,
            persist_interval_ms: 500,
            storage_reserve_bytes: None,
            retry: None,
        }
    }
}

impl BatchdlConfig {
    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("batchdl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Unix socket a running `batchdl run` listens on for pause/resume/delete.
pub fn control_socket_path() -> Result<PathBuf> {
    let dir = xdg::BaseDirectories::with_prefix("batchdl")?.get_state_home();
    Ok(dir.join("control.sock"))
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BatchdlConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BatchdlConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: BatchdlConfig = toml::from_str(&data)?;
    Ok(cfg)
}
