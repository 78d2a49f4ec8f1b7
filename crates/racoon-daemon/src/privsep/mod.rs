//! Privileged operations.
//!
//! Four calls touch resources the negotiation side should not hold rights
//! to: the key-management socket, private key files and phase scripts.
//! They sit behind [`PrivilegedOps`] so the daemon can run them in-process
//! ([`DirectPrivileged`]) or ask a separate helper to run them
//! ([`ForwardingPrivileged`] talking to a [`PrivilegedServer`]).

mod confine;
mod direct;
mod fdpass;
mod forward;
mod server;

use std::fmt;
use std::os::fd::OwnedFd;
use std::path::Path;

use racoon_protocol::ScriptKind;
use tracing::info;

use crate::config::{PrivsepConfig, PrivsepMode};
use crate::error::DaemonResult;

pub use confine::PathConfinement;
pub use direct::{DirectPrivileged, decode_private_key};
pub use fdpass::{recv_fd, send_fd};
pub use forward::ForwardingPrivileged;
pub use server::{PrivilegedServer, run_listener};

/// Operations that cross the privilege boundary.
pub trait PrivilegedOps: Send {
    /// Opens the key-management control socket.
    fn open_control_socket(&mut self) -> DaemonResult<OwnedFd>;

    /// Releases the control socket. Best effort; never fails.
    fn close_control_socket(&mut self, fd: OwnedFd);

    /// Reads private key material from `path`.
    fn load_private_key(&mut self, path: &Path) -> DaemonResult<PrivateKey>;

    /// Runs the `kind` phase script at `path`. Returns its exit status, or
    /// -1 when the request is refused or cannot be delivered.
    fn run_script(&mut self, path: &Path, kind: ScriptKind, environment: &[String]) -> i32;
}

impl<T: PrivilegedOps + ?Sized> PrivilegedOps for Box<T> {
    fn open_control_socket(&mut self) -> DaemonResult<OwnedFd> {
        (**self).open_control_socket()
    }

    fn close_control_socket(&mut self, fd: OwnedFd) {
        (**self).close_control_socket(fd)
    }

    fn load_private_key(&mut self, path: &Path) -> DaemonResult<PrivateKey> {
        (**self).load_private_key(path)
    }

    fn run_script(&mut self, path: &Path, kind: ScriptKind, environment: &[String]) -> i32 {
        (**self).run_script(path, kind, environment)
    }
}

/// DER-encoded private key material.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([REDACTED; {} bytes])", self.0.len())
    }
}

/// Builds the backend selected by `config.mode`.
pub fn from_config(config: &PrivsepConfig) -> DaemonResult<Box<dyn PrivilegedOps>> {
    match config.mode {
        PrivsepMode::Direct => {
            info!("privileged operations run in-process");
            Ok(Box::new(DirectPrivileged::confined(config.confinement())))
        }
        PrivsepMode::Forward => {
            let ops = ForwardingPrivileged::connect(&config.socket)?
                .with_timeout(config.timeout())?;
            info!(socket = %config.socket.display(), "privileged operations forwarded to helper");
            Ok(Box::new(ops))
        }
    }
}
