//! Host configuration.
//!
//! Read from the TOML file named by `MINIMAP_CONFIG`, else `minimap.toml` in
//! the working directory. A missing file means defaults.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use minimap_web_server::{DEFAULT_IO_TIMEOUT, DEFAULT_PORT, ServerConfig};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "MINIMAP_CONFIG";

const CONFIG_FILE: &str = "minimap.toml";

/// Host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address the server binds to.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Directory holding map images.
    #[serde(default = "default_content_root")]
    pub content_root: PathBuf,

    /// Directory holding the browser client (`<content_root>/WebAssets` if unset).
    #[serde(default)]
    pub web_root: Option<PathBuf>,

    /// Extra level calibrations merged over the built-in table.
    #[serde(default)]
    pub calibration_file: Option<PathBuf>,

    /// Map scale reported to clients.
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Request read and frame send timeout in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_content_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_scale() -> f64 {
    1.0
}

fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT.as_millis() as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            content_root: default_content_root(),
            web_root: None,
            calibration_file: None,
            scale: default_scale(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl Config {
    /// Loads the configuration file, or defaults if there is none.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Web-asset root after applying the default.
    pub fn web_root(&self) -> PathBuf {
        self.web_root
            .clone()
            .unwrap_or_else(|| self.content_root.join("WebAssets"))
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            content_root: self.content_root.clone(),
            web_root: self.web_root(),
            io_timeout: Duration::from_millis(self.io_timeout_ms.max(1)),
            ..ServerConfig::default()
        }
    }
}

fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}
