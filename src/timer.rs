//! Deadline-ordered one-shot timers.
//!
//! The [`TimerWheel`] is the only source of time-based suspension in the
//! runtime. Entries are keyed by `(deadline, sequence)` so that equal
//! deadlines fire in insertion order, and an entry leaves the wheel before its
//! callback runs. A callback may therefore schedule new timers, including
//! already-expired ones, without them being picked up by the `advance` call
//! that is currently firing.
//!
//! # Example
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::{Duration, Instant};
//! use tickloop::TimerWheel;
//!
//! let fired = Rc::new(RefCell::new(Vec::new()));
//! let mut wheel = TimerWheel::new();
//! let start = Instant::now();
//!
//! for ms in [300u64, 100, 200] {
//!     let fired = fired.clone();
//!     wheel.schedule(start, Duration::from_millis(ms), move || fired.borrow_mut().push(ms));
//! }
//!
//! wheel.advance(start + Duration::from_millis(300));
//! assert_eq!(*fired.borrow(), vec![100, 200, 300]);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

/// Callback stored in the wheel.
pub(crate) type TimerCallback = Box<dyn FnOnce()>;

/// Stand-in deadline distance for delays too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + delay`, clamped to a far-future instant when the sum overflows.
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Identifies a scheduled timer for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Returns the raw sequence number of this timer.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Ordered set of pending one-shot timers.
///
/// Time is passed in explicitly so the wheel stays deterministic; the runtime
/// feeds it `Instant::now()` once per tick.
pub struct TimerWheel {
    entries: BTreeMap<(Instant, u64), TimerCallback>,
    deadlines: HashMap<u64, Instant>,
    next_seq: u64,
}

impl TimerWheel {
    /// Creates an empty wheel.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Registers `callback` to fire once `delay` has elapsed after `now`.
    ///
    /// A delay too large to add to `now` (such as `Duration::MAX`) parks the
    /// timer about a century out; cancel it to get rid of it.
    pub fn schedule<F>(&mut self, now: Instant, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.insert(deadline_after(now, delay), Box::new(callback))
    }

    pub(crate) fn insert(&mut self, fire_at: Instant, callback: TimerCallback) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.entries.insert((fire_at, seq), callback);
        self.deadlines.insert(seq, fire_at);

        TimerHandle(seq)
    }

    /// Cancels a pending timer.
    ///
    /// Returns `true` if the timer was still pending. Cancelling a timer that
    /// already fired or was already cancelled is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match self.deadlines.remove(&handle.0) {
            Some(fire_at) => self.entries.remove(&(fire_at, handle.0)).is_some(),
            None => false,
        }
    }

    /// Removes every entry whose deadline is `<= now` and returns their
    /// callbacks in firing order, without running them.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<TimerCallback> {
        // Sequence numbers never reach u64::MAX, so every key at `now` sorts
        // below the split point.
        let later = self.entries.split_off(&(now, u64::MAX));
        let due = std::mem::replace(&mut self.entries, later);

        due.into_iter()
            .map(|((_, seq), callback)| {
                self.deadlines.remove(&seq);
                callback
            })
            .collect()
    }

    /// Fires every timer whose deadline is `<= now`, in deadline order.
    ///
    /// Returns the number of callbacks run.
    pub fn advance(&mut self, now: Instant) -> usize {
        let due = self.take_due(now);
        let fired = due.len();

        for callback in due {
            callback();
        }

        fired
    }

    /// Returns the earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(fire_at, _)| *fire_at)
    }

    /// Number of pending timers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no timer is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerWheel")
            .field("pending", &self.entries.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn fires_in_deadline_order() {
        let log = recorder();
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();

        for (ms, name) in [(300, "c"), (100, "a"), (200, "b")] {
            let log = log.clone();
            wheel.schedule(t0, Duration::from_millis(ms), move || log.borrow_mut().push(name));
        }

        assert_eq!(wheel.advance(t0 + Duration::from_millis(150)), 1);
        assert_eq!(*log.borrow(), vec!["a"]);

        assert_eq!(wheel.advance(t0 + Duration::from_secs(1)), 2);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let log = recorder();
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();

        for name in ["first", "second", "third"] {
            let log = log.clone();
            wheel.schedule(t0, Duration::from_millis(10), move || log.borrow_mut().push(name));
        }

        wheel.advance(t0 + Duration::from_millis(10));
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let log = recorder();
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();

        let l = log.clone();
        wheel.schedule(t0, Duration::from_millis(50), move || l.borrow_mut().push("late"));

        assert_eq!(wheel.advance(t0 + Duration::from_millis(49)), 0);
        assert!(log.borrow().is_empty());
        assert_eq!(wheel.next_deadline(), Some(t0 + Duration::from_millis(50)));
    }

    #[test]
    fn cancel_is_idempotent() {
        let log = recorder();
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();

        let l = log.clone();
        let handle = wheel.schedule(t0, Duration::ZERO, move || l.borrow_mut().push("x"));

        assert!(wheel.cancel(handle));
        assert!(!wheel.cancel(handle));
        assert_eq!(wheel.advance(t0), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn cancel_after_fire_is_noop() {
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();
        let handle = wheel.schedule(t0, Duration::ZERO, || {});

        assert_eq!(wheel.advance(t0), 1);
        assert!(!wheel.cancel(handle));
    }

    #[test]
    fn unrepresentable_delay_is_clamped() {
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();
        let handle = wheel.schedule(t0, Duration::MAX, || {});

        let deadline = wheel.next_deadline().unwrap();
        assert!(deadline > t0 + Duration::from_secs(365 * 24 * 60 * 60));
        assert_eq!(wheel.advance(t0 + Duration::from_secs(3600)), 0);
        assert!(wheel.cancel(handle));
    }

    #[test]
    fn due_entries_leave_the_wheel_before_running() {
        let mut wheel = TimerWheel::new();
        let t0 = Instant::now();
        wheel.schedule(t0, Duration::ZERO, || {});
        wheel.schedule(t0, Duration::from_secs(5), || {});

        let due = wheel.take_due(t0);
        assert_eq!(due.len(), 1);
        assert_eq!(wheel.len(), 1);
    }
}
