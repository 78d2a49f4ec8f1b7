//! Timer integration for the event loop.
//!
//! The reactor asks its [`Scheduler`] once per iteration how long it may
//! wait. [`TimerQueue`] is the stock implementation: due timers fire inside
//! that query, and the remaining time to the earliest pending one becomes
//! the wait deadline.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

/// Source of the per-iteration wait deadline.
pub trait Scheduler {
    /// Time until the next pending event, or `None` to wait indefinitely.
    ///
    /// Called exactly once per loop iteration, before the wait.
    fn next_deadline(&mut self) -> Option<Duration>;
}

impl<F> Scheduler for F
where
    F: FnMut() -> Option<Duration>,
{
    fn next_deadline(&mut self) -> Option<Duration> {
        self()
    }
}

/// Handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

type TimerAction = Box<dyn FnOnce() + Send>;

struct Timer {
    label: String,
    action: TimerAction,
}

/// Deadline-ordered one-shot timers.
#[derive(Default)]
pub struct TimerQueue {
    timers: BTreeMap<(Instant, TimerId), Timer>,
    index: HashMap<TimerId, Instant>,
    next_id: u64,
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("pending", &self.timers.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` once `delay` has elapsed.
    pub fn schedule(
        &mut self,
        delay: Duration,
        label: impl Into<String>,
        action: impl FnOnce() + Send + 'static,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let at = deadline_after(Instant::now(), delay);
        let label = label.into();
        trace!(timer = id.0, %label, ?delay, "timer scheduled");
        self.timers.insert(
            (at, id),
            Timer {
                label,
                action: Box::new(action),
            },
        );
        self.index.insert(id, at);
        id
    }

    /// Removes a pending timer. Returns `false` if it already fired or was
    /// cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        let Some(at) = self.index.remove(&id) else {
            return false;
        };
        if let Some(timer) = self.timers.remove(&(at, id)) {
            trace!(timer = id.0, label = %timer.label, "timer cancelled");
        }
        true
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Fires every timer due at `now`, earliest first. Returns how many ran.
    fn fire_due(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(entry) = self.timers.first_entry() {
            let (at, id) = *entry.key();
            if at > now {
                break;
            }
            let timer = entry.remove();
            self.index.remove(&id);
            debug!(timer = id.0, label = %timer.label, "timer fired");
            (timer.action)();
            fired += 1;
        }
        fired
    }
}

/// `now + delay`, clamped to roughly thirty years out.
fn deadline_after(now: Instant, delay: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);
    let delay = delay.min(FAR_FUTURE);
    now.checked_add(delay)
        .or_else(|| now.checked_add(delay / 2))
        .unwrap_or(now)
}

impl Scheduler for TimerQueue {
    fn next_deadline(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.fire_due(now);
        self.timers
            .first_key_value()
            .map(|(&(at, _), _)| at.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> TimerAction) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = log.clone();
            move |name: &'static str| -> TimerAction {
                let log = log.clone();
                Box::new(move || log.lock().unwrap().push(name))
            }
        };
        (log, make)
    }

    #[test]
    fn closures_are_schedulers() {
        let mut calls = 0;
        let mut scheduler = || {
            calls += 1;
            Some(Duration::from_millis(5))
        };
        assert_eq!(scheduler.next_deadline(), Some(Duration::from_millis(5)));
        assert_eq!(scheduler.next_deadline(), Some(Duration::from_millis(5)));
        drop(scheduler);
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_waits_indefinitely() {
        let mut queue = TimerQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_tracks_earliest_timer() {
        let mut queue = TimerQueue::new();
        queue.schedule(Duration::from_secs(30), "rekey", || {});
        queue.schedule(Duration::from_secs(10), "dpd", || {});

        assert_eq!(queue.next_deadline(), Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(queue.next_deadline(), Some(Duration::from_secs(6)));
    }

    #[tokio::test(start_paused = true)]
    async fn due_timers_fire_in_order() {
        let (log, make) = recorder();
        let mut queue = TimerQueue::new();
        queue.schedule(Duration::from_secs(3), "third", make("third"));
        queue.schedule(Duration::from_secs(1), "first", make("first"));
        queue.schedule(Duration::from_secs(2), "second", make("second"));
        queue.schedule(Duration::from_secs(60), "later", make("later"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(queue.next_deadline(), Some(Duration::from_secs(57)));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_fires_on_next_query() {
        let (log, make) = recorder();
        let mut queue = TimerQueue::new();
        queue.schedule(Duration::ZERO, "now", make("now"));

        assert_eq!(queue.next_deadline(), None);
        assert_eq!(*log.lock().unwrap(), vec!["now"]);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_delay_is_clamped() {
        let (log, make) = recorder();
        let mut queue = TimerQueue::new();
        let id = queue.schedule(Duration::MAX, "never", make("never"));

        let deadline = queue.next_deadline().unwrap();
        assert!(deadline > Duration::from_secs(86_400 * 365));
        assert!(log.lock().unwrap().is_empty());
        assert!(queue.cancel(id));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (log, make) = recorder();
        let mut queue = TimerQueue::new();
        let id = queue.schedule(Duration::from_secs(1), "cancel-me", make("cancel-me"));
        queue.schedule(Duration::from_secs(2), "keep", make("keep"));

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(queue.next_deadline(), None);
        assert_eq!(*log.lock().unwrap(), vec!["keep"]);
    }
}
