//! Default subsystems and event handlers.
//!
//! Negotiation and key-message processing live outside this binary. The
//! handlers here drain and log what arrives so the loop stays serviceable.

use std::io;
use std::net::SocketAddr;

use racoon_core::{LogLevel, plog, sanitize_binary};
use racoon_daemon::{
    AddressBinding, AddressRegistry, ControlSocket, DaemonConfig, DaemonContext, DaemonError,
    DaemonResult, EventHandler, PrivilegedOps, Subsystems, TimerQueue,
};
use tracing::{debug, info};

/// Largest datagram read in one call.
const RECV_BUFFER_LEN: usize = 64 * 1024;

/// Brings up the control socket and the negotiation sockets.
pub struct DaemonSubsystems {
    config: DaemonConfig,
    privileged: Box<dyn PrivilegedOps>,
    scheduler: Option<TimerQueue>,
    control: Option<ControlSocket>,
    registry: Option<AddressRegistry>,
}

impl DaemonSubsystems {
    pub fn new(config: DaemonConfig, privileged: Box<dyn PrivilegedOps>) -> Self {
        Self {
            config,
            privileged,
            scheduler: None,
            control: None,
            registry: None,
        }
    }

    /// Hands the initialized pieces to the reactor.
    pub fn into_parts(self) -> DaemonResult<(DaemonContext, TimerQueue, Box<dyn PrivilegedOps>)> {
        let (Some(control), Some(registry)) = (self.control, self.registry) else {
            return Err(DaemonError::config("startup did not complete"));
        };
        let scheduler = self.scheduler.unwrap_or_default();
        Ok((DaemonContext::new(control, registry), scheduler, self.privileged))
    }

    /// Releases what a failed startup already acquired.
    pub fn abort(&mut self) {
        self.registry = None;
        if let Some(control) = self.control.take() {
            self.privileged.close_control_socket(control.into_inner());
        }
    }
}

impl Subsystems for DaemonSubsystems {
    fn init_crypto(&mut self) {
        plog!(LogLevel::Debug, "crypto: using built-in primitives");
    }

    fn init_diffie_hellman(&mut self) {
        plog!(LogLevel::Debug, "dh: no groups preloaded");
    }

    fn compute_vendor_ids(&mut self) {
        plog!(LogLevel::Debug, "vendor ids: none configured");
    }

    fn init_scheduler(&mut self) {
        self.scheduler = Some(TimerQueue::new());
    }

    fn init_control(&mut self) -> DaemonResult<()> {
        let fd = self.privileged.open_control_socket()?;
        self.control = Some(ControlSocket::new(fd)?);
        Ok(())
    }

    fn init_negotiation(&mut self) -> DaemonResult<()> {
        if self.config.listen.is_empty() {
            return Err(DaemonError::config("no listen addresses"));
        }
        let registry = AddressRegistry::bind_all(&self.config.listen)?;
        if self.config.bypass_policy {
            for binding in registry.iter() {
                binding.apply_bypass_policies()?;
            }
        }
        for binding in registry.iter() {
            plog!(LogLevel::Info, "{} used as isakmp port", binding.address());
        }
        self.registry = Some(registry);
        Ok(())
    }
}

/// Drains readable sockets and logs what arrived.
#[derive(Debug)]
pub struct PassiveHandlers {
    buffer: Vec<u8>,
    control_messages: u64,
    datagrams: u64,
}

impl Default for PassiveHandlers {
    fn default() -> Self {
        Self {
            buffer: vec![0; RECV_BUFFER_LEN],
            control_messages: 0,
            datagrams: 0,
        }
    }
}

impl PassiveHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn control_messages(&self) -> u64 {
        self.control_messages
    }

    pub fn datagrams(&self) -> u64 {
        self.datagrams
    }

    fn log_payload(&self, len: usize) {
        plog!(LogLevel::Verbose, "payload: {}", sanitize_binary(&self.buffer[..len]));
    }
}

impl EventHandler for PassiveHandlers {
    fn handle_control(&mut self, control: &ControlSocket) -> io::Result<()> {
        loop {
            match control.recv(&mut self.buffer) {
                Ok(len) => {
                    self.control_messages += 1;
                    plog!(LogLevel::Debug, "control message ({} bytes) not processed", len);
                    self.log_payload(len);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_address(
        &mut self,
        binding: &AddressBinding,
        _registry: &AddressRegistry,
    ) -> io::Result<()> {
        loop {
            match binding.socket().try_recv_from(&mut self.buffer) {
                Ok((len, peer)) => {
                    self.datagrams += 1;
                    log_datagram(binding.address(), peer, len);
                    self.log_payload(len);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn log_datagram(local: SocketAddr, peer: SocketAddr, len: usize) {
    debug!(%local, %peer, len, "datagram received");
    plog!(LogLevel::Debug, "{} bytes message received from {}", len, peer);
}

/// Logs the startup summary.
pub fn log_ready(context: &DaemonContext) {
    info!(
        addresses = ?context.registry().addresses(),
        "racoon ready"
    );
}
