//! Process-level reactor for the racoon key-management daemon.
//!
//! This crate owns:
//! - The event loop multiplexing the control socket with the negotiation
//!   sockets, paced by a scheduler deadline
//! - The address registry
//! - The signal-to-termination bridge
//! - Privileged operations, in-process or forwarded to a helper
//! - The startup sequence and the bootstrap argument channel
//!
//! # Example
//!
//! ```rust,no_run
//! use racoon_daemon::{
//!     AddressRegistry, ControlSocket, DaemonContext, PrivilegedOps, DirectPrivileged,
//!     Reactor, SignalBridge, TimerQueue,
//! };
//! # use racoon_daemon::{AddressBinding, EventHandler};
//! # struct Quiet;
//! # impl EventHandler for Quiet {
//! #     fn handle_control(&mut self, _: &ControlSocket) -> std::io::Result<()> { Ok(()) }
//! #     fn handle_address(&mut self, _: &AddressBinding, _: &AddressRegistry) -> std::io::Result<()> { Ok(()) }
//! # }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signals = SignalBridge::new();
//!     signals.install()?;
//!
//!     let control = ControlSocket::new(DirectPrivileged::new().open_control_socket()?)?;
//!     let registry = AddressRegistry::bind_all(&["0.0.0.0:500".parse::<std::net::SocketAddr>()?])?;
//!     let context = DaemonContext::new(control, registry);
//!
//!     let mut reactor = Reactor::new(context, TimerQueue::new(), Quiet, signals.watch());
//!     let reason = reactor.run().await?;
//!     std::process::exit(reason.exit_code());
//! }
//! ```

#[cfg(not(unix))]
compile_error!("racoon-daemon requires a Unix platform");

mod bootstrap;
mod config;
mod control;
mod error;
mod privsep;
mod reactor;
mod registry;
mod scheduler;
mod signals;
mod startup;

pub use bootstrap::{
    ARGUMENT_TERMINATOR, BootstrapChannel, BootstrapError, MAX_BOOTSTRAP_ARGUMENTS, acknowledge,
    encode_arguments, read_arguments,
};
pub use config::{DaemonConfig, ISAKMP_PORT, PrivsepConfig, PrivsepMode, default_privsep_socket_path};
pub use control::ControlSocket;
pub use error::{DaemonError, DaemonResult};
pub use privsep::{
    DirectPrivileged, ForwardingPrivileged, PathConfinement, PrivateKey, PrivilegedOps, PrivilegedServer,
    decode_private_key, from_config as privileged_ops_from_config, recv_fd, run_listener, send_fd,
};
pub use reactor::{DaemonContext, EventHandler, ExitReason, Reactor};
pub use registry::{AddressBinding, AddressRegistry};
pub use scheduler::{Scheduler, TimerId, TimerQueue};
pub use signals::{
    SignalBridge, TerminationHandle, TerminationSignal, TerminationWatch, ignore_broken_pipe,
};
pub use startup::{Subsystems, run_startup};
