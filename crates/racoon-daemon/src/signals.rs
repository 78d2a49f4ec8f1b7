//! Signal-to-termination bridge.
//!
//! SIGHUP, SIGINT, SIGTERM and SIGCHLD all end the daemon with status 1;
//! which one arrived is recorded but never changes the outcome. SIGPIPE is
//! ignored so a failed write on a negotiation socket surfaces as `EPIPE`.
//!
//! Delivery only flips a watch channel. The reactor observes it at its next
//! safe point: before a wait, or by waking out of one.

use std::io;
use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

/// Signals that terminate the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationSignal {
    Hangup,
    Interrupt,
    Terminate,
    Child,
}

impl TerminationSignal {
    pub const ALL: [TerminationSignal; 4] = [
        TerminationSignal::Hangup,
        TerminationSignal::Interrupt,
        TerminationSignal::Terminate,
        TerminationSignal::Child,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Hangup => "SIGHUP",
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Child => "SIGCHLD",
        }
    }

    pub fn number(self) -> libc::c_int {
        match self {
            Self::Hangup => libc::SIGHUP,
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Child => libc::SIGCHLD,
        }
    }

    fn kind(self) -> SignalKind {
        SignalKind::from_raw(self.number())
    }
}

impl std::fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

type TerminationTx = Arc<watch::Sender<Option<TerminationSignal>>>;

/// Owns the termination state and the OS signal listener.
pub struct SignalBridge {
    tx: TerminationTx,
    rx: watch::Receiver<Option<TerminationSignal>>,
}

impl Default for SignalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBridge {
    /// Creates a bridge in the running state. No signals are hooked yet.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Ignores SIGPIPE and hooks the four terminating signals.
    ///
    /// Registration happens before this returns, so a signal raised right
    /// after is never lost. Must be called from within a tokio runtime.
    pub fn install(&self) -> io::Result<()> {
        ignore_broken_pipe()?;

        let mut hangup = signal(TerminationSignal::Hangup.kind())?;
        let mut interrupt = signal(TerminationSignal::Interrupt.kind())?;
        let mut terminate = signal(TerminationSignal::Terminate.kind())?;
        let mut child = signal(TerminationSignal::Child.kind())?;

        let handle = self.handle();
        tokio::spawn(async move {
            let received = tokio::select! {
                Some(()) = hangup.recv() => TerminationSignal::Hangup,
                Some(()) = interrupt.recv() => TerminationSignal::Interrupt,
                Some(()) = terminate.recv() => TerminationSignal::Terminate,
                Some(()) = child.recv() => TerminationSignal::Child,
                else => return,
            };
            handle.trigger(received);
        });
        Ok(())
    }

    /// A receiver the reactor can wait on.
    pub fn watch(&self) -> TerminationWatch {
        TerminationWatch {
            rx: self.rx.clone(),
        }
    }

    /// A cloneable handle for triggering termination from code.
    pub fn handle(&self) -> TerminationHandle {
        TerminationHandle {
            tx: self.tx.clone(),
        }
    }

    /// Moves to TERMINATING as if `signal` had been delivered.
    pub fn trigger(&self, signal: TerminationSignal) {
        self.handle().trigger(signal);
    }

    pub fn is_terminating(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// Triggers termination from outside the signal path.
#[derive(Clone)]
pub struct TerminationHandle {
    tx: TerminationTx,
}

impl TerminationHandle {
    /// First signal wins; later ones change nothing.
    pub fn trigger(&self, signal: TerminationSignal) {
        self.tx.send_if_modified(|state| {
            if state.is_none() {
                *state = Some(signal);
                true
            } else {
                false
            }
        });
    }

    pub fn is_terminating(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Reactor side of the bridge.
#[derive(Clone)]
pub struct TerminationWatch {
    rx: watch::Receiver<Option<TerminationSignal>>,
}

impl TerminationWatch {
    /// The received signal, if termination is pending.
    pub fn pending(&self) -> Option<TerminationSignal> {
        *self.rx.borrow()
    }

    /// Resolves once termination is pending.
    ///
    /// Never resolves if the bridge is dropped without terminating.
    pub async fn wait(&mut self) -> TerminationSignal {
        loop {
            if let Some(sig) = *self.rx.borrow_and_update() {
                return sig;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sets SIGPIPE to `SIG_IGN`. Idempotent.
pub fn ignore_broken_pipe() -> io::Result<()> {
    // SAFETY: installing SIG_IGN runs no code in signal context.
    let previous = unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    if previous == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
