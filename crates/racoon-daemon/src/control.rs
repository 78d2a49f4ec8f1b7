//! Key-management control socket.
//!
//! Wraps the descriptor returned by the privileged layer (a `PF_KEY` socket
//! in production, any datagram socket in tests) so the reactor can wait on
//! it alongside the negotiation sockets.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::task::{Context, Poll, Waker};

use tokio::io::unix::AsyncFd;

/// Non-blocking control channel registered with the runtime.
#[derive(Debug)]
pub struct ControlSocket {
    inner: AsyncFd<OwnedFd>,
}

impl ControlSocket {
    /// Registers `fd` with the runtime, switching it to non-blocking mode.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(Self {
            inner: AsyncFd::new(fd)?,
        })
    }

    /// Reads one message without blocking.
    ///
    /// Returns `WouldBlock` once the socket is drained; cached readiness is
    /// cleared then so the next wait blocks until new data arrives.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe { libc::recv(self.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len(), 0) };
        match cvt(n) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let mut cx = Context::from_waker(Waker::noop());
                if let Poll::Ready(Ok(mut guard)) = self.inner.poll_read_ready(&mut cx) {
                    guard.clear_ready();
                }
                Err(e)
            }
            other => other,
        }
    }

    /// Writes one message without blocking.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
        let n = unsafe { libc::send(self.as_raw_fd(), buf.as_ptr().cast(), buf.len(), 0) };
        cvt(n)
    }

    /// Polls for read readiness without consuming it.
    pub fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.poll_read_ready(cx).map_ok(|_guard| ())
    }

    /// Deregisters the socket and returns the descriptor.
    pub fn into_inner(self) -> OwnedFd {
        self.inner.into_inner()
    }
}

impl AsRawFd for ControlSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

impl AsFd for ControlSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.get_ref().as_fd()
    }
}

fn cvt(n: libc::ssize_t) -> io::Result<usize> {
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
