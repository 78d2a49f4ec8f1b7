//! Local address bindings.
//!
//! Each binding pairs a local address with the UDP socket used to negotiate
//! with peers reachable through it. The registry is filled at startup and
//! only ever replaced wholesale afterwards.

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use racoon_core::{PolicyDescriptor, build_bypass_policy};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::error::{DaemonError, DaemonResult};

/// One local address and its negotiation socket.
#[derive(Debug)]
pub struct AddressBinding {
    address: SocketAddr,
    socket: UdpSocket,
}

impl AddressBinding {
    /// Binds a new non-blocking socket on `address`.
    pub async fn bind(address: SocketAddr) -> DaemonResult<Self> {
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|source| DaemonError::Bind { address, source })?;
        Self::from_tokio(socket)
    }

    /// Binds synchronously. Must be called from within a tokio runtime.
    pub fn bind_std(address: SocketAddr) -> DaemonResult<Self> {
        let socket = std::net::UdpSocket::bind(address)
            .map_err(|source| DaemonError::Bind { address, source })?;
        Self::from_std(socket)
    }

    /// Adopts an already bound socket. Must be called from within a tokio
    /// runtime.
    pub fn from_std(socket: std::net::UdpSocket) -> DaemonResult<Self> {
        socket.set_nonblocking(true)?;
        Self::from_tokio(UdpSocket::from_std(socket)?)
    }

    fn from_tokio(socket: UdpSocket) -> DaemonResult<Self> {
        let address = socket.local_addr()?;
        debug!(%address, fd = socket.as_raw_fd(), "bound negotiation socket");
        Ok(Self { address, socket })
    }

    /// The bound local address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    pub fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Lets the daemon's own traffic on this socket skip IPsec processing
    /// in both directions.
    pub fn apply_bypass_policies(&self) -> DaemonResult<()> {
        for command in ["in bypass", "out bypass"] {
            let policy = build_bypass_policy(command).map_err(|e| DaemonError::config(e.to_string()))?;
            set_socket_policy(self.raw_fd(), self.address.is_ipv6(), &policy)?;
        }
        debug!(address = %self.address, "installed bypass policies");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn set_socket_policy(fd: RawFd, ipv6: bool, policy: &PolicyDescriptor) -> std::io::Result<()> {
    // <linux/in.h> IP_IPSEC_POLICY, <linux/in6.h> IPV6_IPSEC_POLICY
    const IP_IPSEC_POLICY: libc::c_int = 16;
    const IPV6_IPSEC_POLICY: libc::c_int = 34;

    let (level, name) = if ipv6 {
        (libc::IPPROTO_IPV6, IPV6_IPSEC_POLICY)
    } else {
        (libc::IPPROTO_IP, IP_IPSEC_POLICY)
    };
    let bytes = policy.to_bytes();
    // SAFETY: `bytes` outlives the call and its length is passed alongside.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            bytes.as_ptr().cast(),
            bytes.len() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_socket_policy(_fd: RawFd, _ipv6: bool, _policy: &PolicyDescriptor) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "per-socket IPsec policies are only supported on Linux",
    ))
}

/// The set of address bindings, in registration order.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    bindings: Vec<AddressBinding>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry, rejecting duplicate addresses.
    pub fn from_bindings(bindings: impl IntoIterator<Item = AddressBinding>) -> DaemonResult<Self> {
        let mut registry = Self::new();
        for binding in bindings {
            registry.insert(binding)?;
        }
        Ok(registry)
    }

    /// Binds every address synchronously, in order.
    pub fn bind_all(addresses: &[SocketAddr]) -> DaemonResult<Self> {
        let registry = Self::from_bindings(
            addresses
                .iter()
                .map(|&address| AddressBinding::bind_std(address))
                .collect::<DaemonResult<Vec<_>>>()?,
        )?;
        info!(count = registry.len(), "negotiation sockets ready");
        Ok(registry)
    }

    /// Adds a binding during startup population.
    pub fn insert(&mut self, binding: AddressBinding) -> DaemonResult<()> {
        if self.lookup_binding(&binding.address).is_some() {
            return Err(DaemonError::DuplicateAddress {
                address: binding.address,
            });
        }
        self.bindings.push(binding);
        Ok(())
    }

    /// Socket bound to exactly `address`, or `None`.
    ///
    /// Equality is strict: family, address, port and, for IPv6, flow info
    /// and scope id must all match.
    pub fn lookup(&self, address: &SocketAddr) -> Option<&UdpSocket> {
        self.lookup_binding(address).map(AddressBinding::socket)
    }

    pub fn lookup_binding(&self, address: &SocketAddr) -> Option<&AddressBinding> {
        self.bindings.iter().find(|b| b.address == *address)
    }

    pub fn bindings(&self) -> &[AddressBinding] {
        &self.bindings
    }

    pub fn iter(&self) -> impl Iterator<Item = &AddressBinding> {
        self.bindings.iter()
    }

    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.bindings.iter().map(|b| b.address).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
