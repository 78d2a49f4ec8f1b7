//! Configuration file.
//!
//! All settings live in a single TOML file, `/etc/racoon/racoon.toml` by
//! default:
//!
//! ```toml
//! [listen]
//! addresses = ["192.0.2.1:500", "[2001:db8::1]:500"]
//! bypass_policy = true
//!
//! [privsep]
//! mode = "forward"
//! socket = "/run/racoon/privsep.sock"
//! key_dir = "/etc/racoon/certs"
//! script_dir = "/etc/racoon/scripts"
//!
//! [logging]
//! level = "notify"
//! format = "json"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use racoon_core::{LogLevel, TracingOutputFormat};
use racoon_daemon::{DaemonConfig, PrivsepConfig};
use serde::{Deserialize, Serialize};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/racoon/racoon.toml";

/// Contents of `racoon.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub listen: ListenSettings,
    pub privsep: PrivsepConfig,
    pub logging: LoggingSettings,
}

/// Negotiation sockets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenSettings {
    pub addresses: Vec<SocketAddr>,

    /// Let the daemon's own traffic bypass IPsec.
    pub bypass_policy: bool,
}

impl Default for ListenSettings {
    fn default() -> Self {
        let defaults = DaemonConfig::default();
        Self {
            addresses: defaults.listen,
            bypass_policy: defaults.bypass_policy,
        }
    }
}

/// Log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: LogLevel,
    pub format: TracingOutputFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Notify,
            format: TracingOutputFormat::Compact,
        }
    }
}

impl FileConfig {
    /// Loads the default file, falling back to built-in defaults when it
    /// does not exist.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads a specific file. A missing file is an error.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        Self::parse(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Settings handed to the daemon core. Non-empty `listen_override`
    /// replaces the configured addresses.
    pub fn daemon_config(&self, listen_override: &[SocketAddr]) -> DaemonConfig {
        let listen = if listen_override.is_empty() {
            self.listen.addresses.clone()
        } else {
            listen_override.to_vec()
        };
        DaemonConfig::default()
            .with_listen(listen)
            .with_bypass_policy(self.listen.bypass_policy)
            .with_privsep(self.privsep.clone())
    }
}
