//! Startup sequence.
//!
//! Subsystems come up in a fixed order before the loop starts. The first
//! four cannot fail. Control and negotiation can, and either failure aborts
//! startup.

use tracing::{debug, info};

use crate::error::{DaemonError, DaemonResult};

/// Initialization hooks, called in declaration order by [`run_startup`].
pub trait Subsystems {
    fn init_crypto(&mut self) {}

    fn init_diffie_hellman(&mut self) {}

    fn compute_vendor_ids(&mut self) {}

    fn init_scheduler(&mut self) {}

    /// Opens the control channel.
    fn init_control(&mut self) -> DaemonResult<()>;

    /// Binds the negotiation sockets.
    fn init_negotiation(&mut self) -> DaemonResult<()>;
}

/// Brings every subsystem up in order.
pub fn run_startup<S: Subsystems + ?Sized>(subsystems: &mut S) -> DaemonResult<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "racoon starting");

    subsystems.init_crypto();
    subsystems.init_diffie_hellman();
    subsystems.compute_vendor_ids();
    subsystems.init_scheduler();
    debug!("core subsystems initialized");

    subsystems
        .init_control()
        .map_err(|e| DaemonError::startup("control", e))?;
    subsystems
        .init_negotiation()
        .map_err(|e| DaemonError::startup("negotiation", e))?;

    info!("startup complete");
    Ok(())
}
