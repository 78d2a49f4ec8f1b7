//! Daemon error types.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use racoon_protocol::{ErrorCode, ErrorResponse, ProtocolError};
use thiserror::Error;

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Errors that can occur in the daemon core.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Framing or encoding failure on the privilege-forwarding channel.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The privileged helper refused or failed a request.
    #[error("Privileged helper error: {0}")]
    Privileged(#[from] ErrorResponse),

    #[error("Cannot bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Address {address} is already registered")]
    DuplicateAddress { address: SocketAddr },

    #[error("Cannot load private key {path}: {message}")]
    Key { path: PathBuf, message: String },

    /// A required subsystem failed to initialize.
    #[error("Cannot initialize {subsystem}: {source}")]
    Startup {
        subsystem: &'static str,
        #[source]
        source: Box<DaemonError>,
    },

    /// The readiness wait itself failed; the loop cannot continue.
    #[error("Readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An earlier call left the helper connection in an unknown state.
    #[error("Privileged helper connection is out of sync")]
    HelperDesynchronized,

    /// A privileged request named a path outside its allowed directory.
    #[error("{path} is outside {root}")]
    PathDenied { path: PathBuf, root: PathBuf },
}

impl DaemonError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn key(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Key {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn startup(subsystem: &'static str, source: DaemonError) -> Self {
        Self::Startup {
            subsystem,
            source: Box::new(source),
        }
    }

    /// Closest wire error code, used when answering a forwarded request.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Io(e) | Self::Bind { source: e, .. } | Self::Wait(e) => ErrorCode::from_io(e),
            Self::Privileged(e) => e.code,
            Self::Key { .. } | Self::Config { .. } => ErrorCode::InvalidRequest,
            Self::Startup { source, .. } => source.error_code(),
            Self::PathDenied { .. } => ErrorCode::PermissionDenied,
            Self::Protocol(_) | Self::DuplicateAddress { .. } | Self::HelperDesynchronized => {
                ErrorCode::InternalError
            }
        }
    }
}
