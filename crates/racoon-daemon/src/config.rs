//! Daemon configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::privsep::PathConfinement;

/// Default negotiation port.
pub const ISAKMP_PORT: u16 = 500;

/// How privileged operations are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivsepMode {
    /// Run privileged operations in this process.
    #[default]
    Direct,
    /// Forward them to a privileged helper over a Unix socket.
    Forward,
}

/// Privilege-separation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivsepConfig {
    pub mode: PrivsepMode,
    /// Helper socket, used in `forward` mode.
    pub socket: PathBuf,
    /// Per-call timeout in seconds for forwarded operations. 0 disables it.
    pub timeout_secs: u64,
    /// Private keys may only be loaded from below this directory.
    pub key_dir: PathBuf,
    /// Phase scripts may only be run from below this directory.
    pub script_dir: PathBuf,
}

impl Default for PrivsepConfig {
    fn default() -> Self {
        Self {
            mode: PrivsepMode::Direct,
            socket: default_privsep_socket_path(),
            timeout_secs: 10,
            key_dir: PathBuf::from("/etc/racoon/certs"),
            script_dir: PathBuf::from("/etc/racoon/scripts"),
        }
    }
}

impl PrivsepConfig {
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Directories privileged requests are confined to.
    pub fn confinement(&self) -> PathConfinement {
        PathConfinement::new(&self.key_dir, &self.script_dir)
    }
}

/// Settings the daemon core needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Local addresses to negotiate on.
    pub listen: Vec<SocketAddr>,

    /// Install inbound and outbound bypass policies on every negotiation socket.
    pub bypass_policy: bool,

    pub privsep: PrivsepConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: vec![SocketAddr::from(([0, 0, 0, 0], ISAKMP_PORT))],
            bypass_policy: true,
            privsep: PrivsepConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Builder: replace the listen addresses.
    pub fn with_listen(mut self, listen: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.listen = listen.into_iter().collect();
        self
    }

    /// Builder: toggle bypass policy installation.
    pub fn with_bypass_policy(mut self, enabled: bool) -> Self {
        self.bypass_policy = enabled;
        self
    }

    /// Builder: set privilege-separation settings.
    pub fn with_privsep(mut self, privsep: PrivsepConfig) -> Self {
        self.privsep = privsep;
        self
    }
}

/// Default helper socket path.
pub fn default_privsep_socket_path() -> PathBuf {
    PathBuf::from("/run/racoon/privsep.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen, vec!["0.0.0.0:500".parse::<SocketAddr>().unwrap()]);
        assert!(config.bypass_policy);
        assert_eq!(config.privsep.mode, PrivsepMode::Direct);
        assert_eq!(config.privsep.timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_timeout_means_none() {
        let privsep = PrivsepConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(privsep.timeout(), None);
    }

    #[test]
    fn builders() {
        let addr: SocketAddr = "[::1]:4500".parse().unwrap();
        let config = DaemonConfig::default()
            .with_listen([addr])
            .with_bypass_policy(false)
            .with_privsep(PrivsepConfig {
                mode: PrivsepMode::Forward,
                ..Default::default()
            });

        assert_eq!(config.listen, vec![addr]);
        assert!(!config.bypass_policy);
        assert_eq!(config.privsep.mode, PrivsepMode::Forward);
        assert_eq!(config.privsep.socket, default_privsep_socket_path());
    }
}
