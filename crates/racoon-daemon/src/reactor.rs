//! The event loop.
//!
//! One iteration:
//!
//! 1. swap in a new registry if the handler offers one,
//! 2. stop if termination is pending,
//! 3. ask the scheduler for a deadline,
//! 4. wait on the control socket plus every registered address socket,
//! 5. dispatch: control first, then ready addresses in registry order.
//!
//! Readiness is level-triggered. A socket the handler leaves undrained is
//! reported again on the next iteration.

use std::future::poll_fn;
use std::io;
use std::task::{Context, Poll};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::control::ControlSocket;
use crate::error::{DaemonError, DaemonResult};
use crate::registry::{AddressBinding, AddressRegistry};
use crate::scheduler::Scheduler;
use crate::signals::{TerminationSignal, TerminationWatch};

/// Everything the loop reads from: the control socket and the registry.
#[derive(Debug)]
pub struct DaemonContext {
    control: ControlSocket,
    registry: AddressRegistry,
}

impl DaemonContext {
    pub fn new(control: ControlSocket, registry: AddressRegistry) -> Self {
        Self { control, registry }
    }

    pub fn control(&self) -> &ControlSocket {
        &self.control
    }

    pub fn registry(&self) -> &AddressRegistry {
        &self.registry
    }

    /// Replaces the registry wholesale. The old sockets are closed.
    pub fn replace_registry(&mut self, registry: AddressRegistry) -> AddressRegistry {
        std::mem::replace(&mut self.registry, registry)
    }

    pub fn into_parts(self) -> (ControlSocket, AddressRegistry) {
        (self.control, self.registry)
    }
}

/// Readiness callbacks. Both run synchronously and to completion before the
/// next wait.
pub trait EventHandler {
    /// The control socket is readable.
    fn handle_control(&mut self, control: &ControlSocket) -> io::Result<()>;

    /// `binding`'s socket is readable.
    fn handle_address(
        &mut self,
        binding: &AddressBinding,
        registry: &AddressRegistry,
    ) -> io::Result<()>;

    /// Offers a replacement registry. Polled once at the top of every
    /// iteration.
    fn registry_update(&mut self) -> Option<AddressRegistry> {
        None
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Signal(TerminationSignal),
}

impl ExitReason {
    /// Process status for this exit. Every signal exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Signal(_) => 1,
        }
    }
}

/// Descriptors that became readable in one wait.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ReadySet {
    control: bool,
    /// Indexes into the registry, ascending.
    addresses: Vec<usize>,
}

impl ReadySet {
    fn is_empty(&self) -> bool {
        !self.control && self.addresses.is_empty()
    }
}

/// The control socket plus one socket per binding, rebuilt every iteration.
struct WaitSet<'a> {
    control: &'a ControlSocket,
    bindings: &'a [AddressBinding],
}

impl<'a> WaitSet<'a> {
    fn new(context: &'a DaemonContext) -> Self {
        Self {
            control: &context.control,
            bindings: context.registry.bindings(),
        }
    }

    fn len(&self) -> usize {
        1 + self.bindings.len()
    }

    /// Resolves once at least one member is readable. Every member is polled
    /// each time so all ready sockets are reported together.
    async fn readable(&self) -> io::Result<ReadySet> {
        poll_fn(|cx| self.poll_readable(cx)).await
    }

    fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<io::Result<ReadySet>> {
        let mut ready = ReadySet::default();
        match self.control.poll_read_ready(cx) {
            Poll::Ready(Ok(())) => ready.control = true,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => {}
        }
        for (index, binding) in self.bindings.iter().enumerate() {
            match binding.socket().poll_recv_ready(cx) {
                Poll::Ready(Ok(())) => ready.addresses.push(index),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {}
            }
        }
        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(Ok(ready))
        }
    }
}

async fn deadline_elapsed(deadline: Option<Duration>) {
    match deadline {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending().await,
    }
}

/// Single-threaded reactor driving one [`EventHandler`].
pub struct Reactor<S, H> {
    context: DaemonContext,
    scheduler: S,
    handler: H,
    termination: TerminationWatch,
    iterations: u64,
}

impl<S, H> Reactor<S, H>
where
    S: Scheduler,
    H: EventHandler,
{
    pub fn new(context: DaemonContext, scheduler: S, handler: H, termination: TerminationWatch) -> Self {
        Self {
            context,
            scheduler,
            handler,
            termination,
            iterations: 0,
        }
    }

    /// Runs until a termination signal arrives or the wait itself fails.
    pub async fn run(&mut self) -> DaemonResult<ExitReason> {
        info!(
            addresses = self.context.registry.len(),
            "entering event loop"
        );
        loop {
            if let Some(reason) = self.turn().await? {
                let ExitReason::Signal(signal) = reason;
                info!(%signal, iterations = self.iterations, "terminating");
                return Ok(reason);
            }
        }
    }

    /// Runs one iteration. Returns `Some` once termination is pending.
    pub async fn turn(&mut self) -> DaemonResult<Option<ExitReason>> {
        if let Some(registry) = self.handler.registry_update() {
            let old = self.context.replace_registry(registry);
            info!(
                previous = old.len(),
                current = self.context.registry.len(),
                "address registry replaced"
            );
        }

        if let Some(signal) = self.termination.pending() {
            return Ok(Some(ExitReason::Signal(signal)));
        }

        let deadline = self.scheduler.next_deadline();
        self.iterations += 1;

        let ready = {
            let wait_set = WaitSet::new(&self.context);
            trace!(descriptors = wait_set.len(), ?deadline, "waiting");

            tokio::select! {
                biased;
                signal = self.termination.wait() => {
                    return Ok(Some(ExitReason::Signal(signal)));
                }
                ready = wait_set.readable() => ready.map_err(DaemonError::Wait)?,
                () = deadline_elapsed(deadline) => ReadySet::default(),
            }
        };

        if ready.is_empty() {
            // Deadline hit. Give the signal listener a chance to run even
            // when the scheduler keeps answering zero.
            tokio::task::yield_now().await;
            return Ok(None);
        }

        Ok(self.dispatch(ready))
    }

    fn dispatch(&mut self, ready: ReadySet) -> Option<ExitReason> {
        let context = &self.context;

        if ready.control {
            if let Err(e) = self.handler.handle_control(&context.control) {
                report_handler_error("control", None, &e);
            }
        }

        for index in ready.addresses {
            if let Some(signal) = self.termination.pending() {
                debug!(%signal, "termination pending, skipping remaining handlers");
                return Some(ExitReason::Signal(signal));
            }
            let Some(binding) = context.registry.bindings().get(index) else {
                continue;
            };
            if let Err(e) = self.handler.handle_address(binding, &context.registry) {
                report_handler_error("address", Some(binding), &e);
            }
        }
        None
    }

    pub fn context(&self) -> &DaemonContext {
        &self.context
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    /// Number of waits performed so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn into_parts(self) -> (DaemonContext, S, H) {
        (self.context, self.scheduler, self.handler)
    }
}

fn report_handler_error(kind: &'static str, binding: Option<&AddressBinding>, e: &io::Error) {
    if e.kind() == io::ErrorKind::WouldBlock {
        trace!(kind, "handler found nothing to read");
        return;
    }
    match binding {
        Some(binding) => warn!(kind, address = %binding.address(), error = %e, "handler failed"),
        None => warn!(kind, error = %e, "handler failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{SignalBridge, TerminationHandle};
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixDatagram;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Control,
        Address(SocketAddr),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
        failing: HashSet<SocketAddr>,
        replacement: Option<AddressRegistry>,
    }

    impl EventHandler for Recorder {
        fn handle_control(&mut self, control: &ControlSocket) -> io::Result<()> {
            self.events.push(Event::Control);
            let mut buf = [0u8; 512];
            loop {
                match control.recv(&mut buf) {
                    Ok(_) => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        }

        fn handle_address(
            &mut self,
            binding: &AddressBinding,
            registry: &AddressRegistry,
        ) -> io::Result<()> {
            self.events.push(Event::Address(binding.address()));
            assert!(registry.lookup(&binding.address()).is_some());
            if self.failing.contains(&binding.address()) {
                return Err(io::Error::other("peer sent garbage"));
            }
            let mut buf = [0u8; 512];
            loop {
                match binding.socket().try_recv_from(&mut buf) {
                    Ok(_) => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        }

        fn registry_update(&mut self) -> Option<AddressRegistry> {
            self.replacement.take()
        }
    }

    struct Fixture {
        context: DaemonContext,
        control_peer: UnixDatagram,
        addresses: Vec<SocketAddr>,
        sender: std::net::UdpSocket,
    }

    async fn fixture(bindings: usize) -> Fixture {
        let (ours, control_peer) = UnixDatagram::pair().unwrap();
        let control = ControlSocket::new(OwnedFd::from(ours)).unwrap();

        let mut registry = AddressRegistry::new();
        for _ in 0..bindings {
            let binding = AddressBinding::bind("127.0.0.1:0".parse().unwrap())
                .await
                .unwrap();
            registry.insert(binding).unwrap();
        }
        let addresses = registry.addresses();

        Fixture {
            context: DaemonContext::new(control, registry),
            control_peer,
            addresses,
            sender: std::net::UdpSocket::bind("127.0.0.1:0").unwrap(),
        }
    }

    fn never() -> impl Scheduler {
        || None::<Duration>
    }

    fn zero() -> impl Scheduler {
        || Some(Duration::ZERO)
    }

    #[tokio::test]
    async fn control_runs_before_addresses() {
        let fx = fixture(2).await;
        let (a, b) = (fx.addresses[0], fx.addresses[1]);
        fx.sender.send_to(b"isakmp", a).unwrap();
        fx.control_peer.send(b"sadb").unwrap();

        let bridge = SignalBridge::new();
        let mut reactor = Reactor::new(fx.context, never(), Recorder::default(), bridge.watch());

        let outcome = tokio::time::timeout(Duration::from_secs(2), reactor.turn())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(reactor.handler().events, vec![Event::Control, Event::Address(a)]);
        assert!(!reactor.handler().events.contains(&Event::Address(b)));
        assert_eq!(reactor.iterations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_deadline_requeries_scheduler() {
        let fx = fixture(0).await;
        let bridge = SignalBridge::new();
        let handle: TerminationHandle = bridge.handle();

        let mut queries = 0u32;
        let scheduler = move || {
            queries += 1;
            if queries == 3 {
                handle.trigger(TerminationSignal::Terminate);
            }
            Some(Duration::ZERO)
        };

        let mut reactor = Reactor::new(fx.context, scheduler, Recorder::default(), bridge.watch());
        let reason = tokio::time::timeout(Duration::from_secs(1), reactor.run())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reason, ExitReason::Signal(TerminationSignal::Terminate));
        assert_eq!(reason.exit_code(), 1);
        assert_eq!(reactor.iterations(), 3);
        assert!(reactor.handler().events.is_empty());
    }

    #[tokio::test]
    async fn empty_registry_still_serves_control() {
        let fx = fixture(0).await;
        fx.control_peer.send(b"sadb").unwrap();

        let bridge = SignalBridge::new();
        let mut reactor = Reactor::new(fx.context, never(), Recorder::default(), bridge.watch());
        tokio::time::timeout(Duration::from_secs(2), reactor.turn())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(reactor.handler().events, vec![Event::Control]);
    }

    #[tokio::test]
    async fn failing_address_does_not_stop_others() {
        let fx = fixture(2).await;
        let (a, b) = (fx.addresses[0], fx.addresses[1]);
        fx.sender.send_to(b"one", a).unwrap();
        fx.sender.send_to(b"two", b).unwrap();

        let mut recorder = Recorder::default();
        recorder.failing.insert(a);

        let bridge = SignalBridge::new();
        let mut reactor = Reactor::new(fx.context, never(), recorder, bridge.watch());

        // Give both datagrams time to land so they are reported together.
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(2), reactor.turn())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reactor.handler().events,
            vec![Event::Address(a), Event::Address(b)]
        );

        // `a` was left undrained and is reported again; `b` is quiet.
        tokio::time::timeout(Duration::from_secs(2), reactor.turn())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            reactor.handler().events,
            vec![Event::Address(a), Event::Address(b), Event::Address(a)]
        );
    }

    #[tokio::test]
    async fn registry_swapped_before_wait() {
        let fx = fixture(1).await;
        let replacement = AddressRegistry::from_bindings([
            AddressBinding::bind("127.0.0.1:0".parse().unwrap())
                .await
                .unwrap(),
            AddressBinding::bind("127.0.0.1:0".parse().unwrap())
                .await
                .unwrap(),
        ])
        .unwrap();
        let new_addresses = replacement.addresses();

        let recorder = Recorder {
            replacement: Some(replacement),
            ..Default::default()
        };
        let bridge = SignalBridge::new();
        let mut reactor = Reactor::new(fx.context, zero(), recorder, bridge.watch());

        reactor.turn().await.unwrap();
        assert_eq!(reactor.context().registry().addresses(), new_addresses);
        assert!(reactor.context().registry().lookup(&fx.addresses[0]).is_none());

        fx.sender.send_to(b"hello", new_addresses[1]).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while reactor.handler().events.is_empty() {
                reactor.turn().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_eq!(reactor.handler().events, vec![Event::Address(new_addresses[1])]);
    }

    #[tokio::test]
    async fn pending_termination_skips_scheduler() {
        let fx = fixture(1).await;
        let bridge = SignalBridge::new();
        bridge.trigger(TerminationSignal::Hangup);

        let mut queried = false;
        let scheduler = || {
            queried = true;
            None::<Duration>
        };
        let mut reactor = Reactor::new(fx.context, scheduler, Recorder::default(), bridge.watch());
        let outcome = reactor.turn().await.unwrap();
        drop(reactor);

        assert_eq!(outcome, Some(ExitReason::Signal(TerminationSignal::Hangup)));
        assert!(!queried);
    }

    #[tokio::test]
    async fn termination_wakes_blocked_wait() {
        let fx = fixture(1).await;
        let bridge = SignalBridge::new();
        let handle = bridge.handle();
        let mut reactor = Reactor::new(fx.context, never(), Recorder::default(), bridge.watch());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.trigger(TerminationSignal::Child);
        });

        let reason = tokio::time::timeout(Duration::from_secs(2), reactor.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ExitReason::Signal(TerminationSignal::Child));
        assert!(reactor.handler().events.is_empty());
    }

    #[test]
    fn wait_failure_ends_the_loop() {
        let runtime = || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
        };

        // Sockets registered with a runtime that has shut down report an
        // error on every readiness poll.
        let first = runtime();
        let fx = first.block_on(fixture(1));
        drop(first);

        fx.control_peer.send(b"sadb").unwrap();
        let bridge = SignalBridge::new();
        let mut reactor = Reactor::new(fx.context, never(), Recorder::default(), bridge.watch());

        let err = runtime().block_on(reactor.run()).unwrap_err();
        assert!(matches!(err, DaemonError::Wait(_)));
        assert!(reactor.handler().events.is_empty());
        assert_eq!(reactor.iterations(), 1);
    }

    #[tokio::test]
    async fn context_parts_survive_loop() {
        let fx = fixture(1).await;
        let bridge = SignalBridge::new();
        bridge.trigger(TerminationSignal::Interrupt);
        let mut reactor = Reactor::new(fx.context, never(), Recorder::default(), bridge.watch());
        reactor.run().await.unwrap();

        let (context, _scheduler, _handler) = reactor.into_parts();
        let (_control, registry) = context.into_parts();
        assert_eq!(registry.addresses(), fx.addresses);
    }
}
