//! The `racoon` daemon: command line, configuration file and the default
//! subsystems wiring the reactor together.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;

pub use cli::Cli;
pub use error::{CliError, CliResult};
