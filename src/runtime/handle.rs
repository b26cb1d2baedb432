//! Shared runtime state and the clonable [`Handle`] onto it.
//!
//! Every piece of core data (coroutine table, timer wheel, ready queue, sink
//! table) sits behind its own `RefCell` and is only touched from the thread
//! that owns the runtime. Borrows are never held across a call into user code:
//! coroutines are taken out of the table while they run, timer callbacks are
//! removed from the wheel before they fire, and sink callbacks are cloned out
//! of the table before they are invoked.

use crate::config::RuntimeConfig;
use crate::coroutine::{Coroutine, Step, TaskHandle, TaskId, TaskOwner, TaskState};
use crate::process::{InstanceId, ProcessOutput, ProcessSink, ShutdownToken};
use crate::runtime::queue::{Inbox, ReadyQueue, SinkId};
use crate::timer::{TimerHandle, TimerWheel, deadline_after};

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

pub(crate) type SinkFn = Rc<dyn Fn(InstanceId, ProcessOutput)>;

struct TaskSlot {
    coroutine: Box<dyn Coroutine>,
    owner: TaskOwner,
    state: Rc<Cell<TaskState>>,
    timer: Option<TimerHandle>,
}

pub(crate) struct Shared {
    config: RuntimeConfig,
    timers: RefCell<TimerWheel>,
    ready: RefCell<ReadyQueue>,
    tasks: RefCell<HashMap<TaskId, TaskSlot>>,
    inbox: Arc<Inbox>,
    sinks: RefCell<HashMap<SinkId, SinkFn>>,
    shutdown: ShutdownToken,
    rejections: Rc<RefCell<Vec<String>>>,
    next_task: Cell<u64>,
    next_sink: Cell<u64>,
}

/// Cheap clonable reference to a runtime.
///
/// Callbacks capture a handle to submit coroutines and schedule timers from
/// inside a tick. A handle keeps the runtime's state alive but does not drive
/// it; only [`Runtime`](crate::Runtime) ticks.
#[derive(Clone)]
pub struct Handle {
    pub(crate) shared: Rc<Shared>,
}

impl Handle {
    pub(crate) fn new(config: RuntimeConfig, shutdown: ShutdownToken) -> Self {
        Self {
            shared: Rc::new(Shared {
                config,
                timers: RefCell::new(TimerWheel::new()),
                ready: RefCell::new(ReadyQueue::new()),
                tasks: RefCell::new(HashMap::new()),
                inbox: Arc::new(Inbox::new()),
                sinks: RefCell::new(HashMap::new()),
                shutdown,
                rejections: Rc::new(RefCell::new(Vec::new())),
                next_task: Cell::new(0),
                next_sink: Cell::new(0),
            }),
        }
    }

    /// Configuration the runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Registers a coroutine for cooperative execution.
    ///
    /// The coroutine is queued as ready and first resumed on the next tick.
    pub fn submit<C>(&self, owner: TaskOwner, coroutine: C) -> TaskHandle
    where
        C: Coroutine + 'static,
    {
        let id = TaskId(self.shared.next_task.get());
        self.shared.next_task.set(id.0 + 1);

        let state = Rc::new(Cell::new(TaskState::Ready));
        self.shared.tasks.borrow_mut().insert(
            id,
            TaskSlot {
                coroutine: Box::new(coroutine),
                owner,
                state: state.clone(),
                timer: None,
            },
        );
        self.shared.ready.borrow_mut().push(id);

        trace!(task = %id, %owner, "coroutine submitted");

        TaskHandle { id, owner, state }
    }

    /// Submits through the worker admission point.
    pub fn worker<C>(&self, coroutine: C) -> TaskHandle
    where
        C: Coroutine + 'static,
    {
        self.submit(TaskOwner::Worker, coroutine)
    }

    /// Submits through the top-level process admission point.
    pub fn process<C>(&self, coroutine: C) -> TaskHandle
    where
        C: Coroutine + 'static,
    {
        self.submit(TaskOwner::Process, coroutine)
    }

    /// Schedules `callback` to run once, at least `delay` from now.
    ///
    /// The callback runs during the timer phase of a later tick.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.shared
            .timers
            .borrow_mut()
            .schedule(Instant::now(), delay, callback)
    }

    /// Cancels a pending timer. Returns `false` if it already fired or was
    /// already cancelled.
    pub fn cancel(&self, timer: TimerHandle) -> bool {
        self.shared.timers.borrow_mut().cancel(timer)
    }

    /// Moves a waiting coroutine back to the ready queue before its delay
    /// elapses.
    ///
    /// Returns `false`, and does nothing, when the coroutine is already ready
    /// or has completed.
    pub fn wake(&self, task: &TaskHandle) -> bool {
        let timer = {
            let mut tasks = self.shared.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(&task.id) else {
                return false;
            };
            if !matches!(slot.state.get(), TaskState::Waiting(_)) {
                return false;
            }
            slot.timer.take()
        };

        if let Some(timer) = timer {
            self.cancel(timer);
        }

        self.promote(task.id)
    }

    /// The token read by supervised processes when they exit.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shared.shutdown.clone()
    }

    /// Number of coroutines submitted and not yet done.
    pub fn live_tasks(&self) -> usize {
        self.shared.tasks.borrow().len()
    }

    /// Number of armed timers.
    pub fn pending_timers(&self) -> usize {
        self.shared.timers.borrow().len()
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.shared.ready.borrow().is_empty()
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.shared.timers.borrow().next_deadline()
    }

    pub(crate) fn inbox(&self) -> &Inbox {
        &self.shared.inbox
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.shared.ready.borrow().is_empty()
            && self.shared.timers.borrow().is_empty()
            && self.shared.inbox.is_empty()
            && self.shared.inbox.open_sources() == 0
    }

    pub(crate) fn rejection_sink(&self) -> Rc<RefCell<Vec<String>>> {
        self.shared.rejections.clone()
    }

    // Waiting -> Ready. Used by delay timers and by `wake`.
    fn promote(&self, id: TaskId) -> bool {
        {
            let mut tasks = self.shared.tasks.borrow_mut();
            let Some(slot) = tasks.get_mut(&id) else {
                return false;
            };
            if !matches!(slot.state.get(), TaskState::Waiting(_)) {
                return false;
            }
            slot.state.set(TaskState::Ready);
            slot.timer = None;
        }

        self.shared.ready.borrow_mut().push(id);
        true
    }

    /// Runs every timer that is due at `now`. Returns how many fired.
    pub(crate) fn fire_timers(&self, now: Instant) -> usize {
        let due = self.shared.timers.borrow_mut().take_due(now);
        let fired = due.len();

        for callback in due {
            callback();
        }

        fired
    }

    pub(crate) fn take_ready_batch(&self) -> VecDeque<TaskId> {
        self.shared.ready.borrow_mut().take_batch()
    }

    /// Resumes one ready coroutine. Returns `true` if it completed.
    ///
    /// # Panics
    /// Panics if `id` is not a live, ready coroutine: the ready queue never
    /// holds anything else, so reaching that state is a scheduler bug.
    pub(crate) fn resume(&self, id: TaskId) -> bool {
        let slot = self.shared.tasks.borrow_mut().remove(&id);
        let Some(mut slot) = slot else {
            panic!("{id} was resumed after it completed");
        };
        assert_eq!(
            slot.state.get(),
            TaskState::Ready,
            "{id} was resumed while not ready"
        );

        match slot.coroutine.resume() {
            Step::Yield => {
                self.shared.tasks.borrow_mut().insert(id, slot);
                self.shared.ready.borrow_mut().push(id);
                false
            }
            Step::Delay(delay) => {
                let until = deadline_after(Instant::now(), delay);
                slot.state.set(TaskState::Waiting(until));

                let weak: Weak<Shared> = Rc::downgrade(&self.shared);
                let timer = self.shared.timers.borrow_mut().insert(
                    until,
                    Box::new(move || {
                        if let Some(shared) = weak.upgrade() {
                            Handle { shared }.promote(id);
                        }
                    }),
                );
                slot.timer = Some(timer);

                trace!(task = %id, ?delay, "coroutine waiting");
                self.shared.tasks.borrow_mut().insert(id, slot);
                false
            }
            Step::Done => {
                slot.state.set(TaskState::Done);
                trace!(task = %id, owner = %slot.owner, "coroutine done");
                true
            }
        }
    }

    pub(crate) fn register_sink(&self, sink: SinkFn) -> SinkId {
        let id = SinkId(self.shared.next_sink.get());
        self.shared.next_sink.set(id.0 + 1);
        self.shared.sinks.borrow_mut().insert(id, sink);
        id
    }

    pub(crate) fn unregister_sink(&self, id: SinkId) {
        let removed = self.shared.sinks.borrow_mut().remove(&id);
        drop(removed);
    }

    /// Opens a producer endpoint that delivers into `target` for `instance`.
    pub(crate) fn open_sink(&self, target: SinkId, instance: InstanceId) -> ProcessSink {
        ProcessSink::open(self.shared.inbox.clone(), target, instance)
    }

    /// Hands every message queued by other threads to its sink.
    pub(crate) fn deliver_external(&self) -> usize {
        let messages = self.shared.inbox.drain();
        let delivered = messages.len();

        for envelope in messages {
            let sink = self.shared.sinks.borrow().get(&envelope.target).cloned();
            match sink {
                Some(sink) => sink(envelope.instance, envelope.output),
                None => debug!(instance = %envelope.instance, "dropping message for a closed sink"),
            }
        }

        delivered
    }

    // Breaks reference cycles formed by callbacks that captured a handle.
    pub(crate) fn clear(&self) {
        let timers = std::mem::take(&mut *self.shared.timers.borrow_mut());
        let tasks = std::mem::take(&mut *self.shared.tasks.borrow_mut());
        let sinks = std::mem::take(&mut *self.shared.sinks.borrow_mut());
        self.shared.ready.borrow_mut().take_batch();

        drop(timers);
        drop(tasks);
        drop(sinks);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("live_tasks", &self.shared.tasks.borrow().len())
            .field("ready", &self.shared.ready.borrow().len())
            .field("timers", &self.shared.timers.borrow().len())
            .field("shutdown", &self.shared.shutdown.is_shutdown())
            .finish()
    }
}
