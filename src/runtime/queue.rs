//! Queues feeding the tick loop.
//!
//! - [`ReadyQueue`]: FIFO of coroutines to resume, touched only from the
//!   scheduling thread.
//! - [`Inbox`]: thread-safe FIFO through which OS-side helpers (process
//!   output readers, exit waiters) hand results back to the scheduler. The
//!   tick drains it at its boundary; nothing from another thread runs
//!   application callbacks directly.

use crate::coroutine::TaskId;
use crate::process::{InstanceId, ProcessOutput};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// FIFO of ready coroutine ids.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    queue: VecDeque<TaskId>,
}

impl ReadyQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Enqueues a coroutine at the back of the queue.
    pub(crate) fn push(&mut self, id: TaskId) {
        self.queue.push_back(id);
    }

    /// Takes everything queued so far as this tick's batch.
    ///
    /// Ids pushed after this call land in a fresh queue and wait for the next
    /// tick.
    pub(crate) fn take_batch(&mut self) -> VecDeque<TaskId> {
        std::mem::take(&mut self.queue)
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Identifies a registered consumer of external messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SinkId(pub(crate) u64);

/// One message handed from another thread to the scheduler.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) target: SinkId,
    pub(crate) instance: InstanceId,
    pub(crate) output: ProcessOutput,
}

/// Thread-safe handoff queue into the tick loop.
///
/// Besides the messages themselves it counts open sources: producers that may
/// still deliver. The runtime is not idle while a source is open.
#[derive(Debug, Default)]
pub(crate) struct Inbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
    open: AtomicUsize,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Envelope>> {
        // A panicking producer cannot leave the deque half-written.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues a message and wakes a parked scheduler.
    pub(crate) fn push(&self, envelope: Envelope) {
        self.lock().push_back(envelope);
        self.arrived.notify_one();
    }

    /// Removes every queued message.
    pub(crate) fn drain(&self) -> Vec<Envelope> {
        self.lock().drain(..).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Blocks until a message arrives or `timeout` elapses.
    pub(crate) fn wait(&self, timeout: Duration) {
        let guard = self.lock();
        if !guard.is_empty() {
            return;
        }

        // Spurious wakeups only shorten the park.
        let _ = self
            .arrived
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }

    pub(crate) fn open_source(&self) {
        self.open.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn close_source(&self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        // A closed source can end the run loop; let a parked scheduler notice.
        self.arrived.notify_one();
    }

    pub(crate) fn open_sources(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }
}
