//! Daemon process error types.

use std::fmt;

use racoon_core::TracingError;
use racoon_daemon::{BootstrapError, DaemonError};

/// Result type for the daemon process.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that end the process before or outside the event loop.
#[derive(Debug)]
pub enum CliError {
    /// Configuration error.
    Config(String),
    /// Logging could not be set up.
    Tracing(TracingError),
    /// The supervisor channel failed.
    Bootstrap(BootstrapError),
    /// Startup or the event loop failed.
    Daemon(DaemonError),
    /// IO error.
    Io(std::io::Error),
}

impl CliError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Bootstrap(_) => 255,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Tracing(err) => write!(f, "logging setup failed: {}", err),
            Self::Bootstrap(err) => write!(f, "bootstrap failed: {}", err),
            Self::Daemon(err) => write!(f, "{}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(_) => None,
            Self::Tracing(err) => Some(err),
            Self::Bootstrap(err) => Some(err),
            Self::Daemon(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<TracingError> for CliError {
    fn from(err: TracingError) -> Self {
        Self::Tracing(err)
    }
}

impl From<BootstrapError> for CliError {
    fn from(err: BootstrapError) -> Self {
        Self::Bootstrap(err)
    }
}

impl From<DaemonError> for CliError {
    fn from(err: DaemonError) -> Self {
        Self::Daemon(err)
    }
}
