//! Daemon configuration.
//!
//! Stored as TOML. The file is looked up from the first command-line
//! argument, then `PARKSENSE_CONFIG`, then `parksense.toml` in the working
//! directory. A missing file is created with the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use parksense_ingest_server::{
    DEFAULT_CHUNK_SIZE, DEFAULT_IMAGES_DIR, DEFAULT_LOG_FILE, Framing, ServerConfig,
};
use serde::{Deserialize, Serialize};

/// Config file used when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "parksense.toml";

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Listen address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory receiving uploaded images.
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,

    /// Append-only telemetry log.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Message framing: `chunk` (bare sensor protocol) or `length_prefixed`.
    #[serde(default)]
    pub framing: Framing,

    /// Read size for `chunk` framing, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Largest accepted frame for `length_prefixed` framing, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Close connections silent for this many seconds. Unset or 0 disables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,

    /// Echo each reading to the log output.
    #[serde(default = "default_true")]
    pub console_telemetry: bool,
}

fn default_host() -> String {
    ServerConfig::default().host
}

fn default_port() -> u16 {
    ServerConfig::default().port
}

fn default_images_dir() -> PathBuf {
    DEFAULT_IMAGES_DIR.into()
}

fn default_log_file() -> PathBuf {
    DEFAULT_LOG_FILE.into()
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_frame_size() -> usize {
    ServerConfig::default().max_frame_size
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            images_dir: default_images_dir(),
            log_file: default_log_file(),
            framing: Framing::default(),
            chunk_size: default_chunk_size(),
            max_frame_size: default_max_frame_size(),
            idle_timeout_secs: None,
            console_telemetry: default_true(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or writes and returns the defaults
    /// if the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "default configuration written");
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn to_server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            images_dir: self.images_dir.clone(),
            log_file: self.log_file.clone(),
            console_telemetry: self.console_telemetry,
            framing: self.framing,
            chunk_size: self.chunk_size,
            max_frame_size: self.max_frame_size,
            idle_timeout: self
                .idle_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/// Picks the config file: explicit argument, then environment, then the
/// default name in the working directory.
pub fn config_path(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
