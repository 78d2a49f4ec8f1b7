//! Command-line interface definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use racoon_core::LogLevel;

/// racoon - IKE key-management daemon
#[derive(Debug, Parser)]
#[command(name = "racoon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short = 'f', env = "RACOON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Raise log verbosity one step (can be repeated)
    #[arg(long, short = 'd', action = ArgAction::Count)]
    pub debug: u8,

    /// Negotiate on this address (can be repeated; replaces the configured list)
    #[arg(long, short = 'l', action = ArgAction::Append)]
    pub listen: Vec<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Receive the command line from a supervisor over this Unix socket
    #[arg(long, value_name = "PATH")]
    pub bootstrap_socket: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// `base` raised by one level per `-d`.
    pub fn log_level(&self, base: LogLevel) -> LogLevel {
        (0..self.debug).fold(base, |level, _| level.more_verbose())
    }
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the privileged side of the forwarding channel
    PrivsepHelper {
        /// Socket to listen on
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },
}
