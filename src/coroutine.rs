//! Stackless coroutines as explicit state machines.
//!
//! A coroutine is any type implementing [`Coroutine`]: its fields hold every
//! value that must survive a suspension, and [`resume`](Coroutine::resume)
//! continues from the resumption point stored in those fields. Each call
//! returns a [`Step`] telling the scheduler what to do next.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tickloop::coroutine::{Coroutine, Step};
//!
//! enum Point { Start, Loop, End }
//!
//! struct Countdown { at: Point, x: u32, seen: Vec<u32> }
//!
//! impl Coroutine for Countdown {
//!     fn resume(&mut self) -> Step {
//!         loop {
//!             match self.at {
//!                 Point::Start => { self.x = 3; self.at = Point::Loop; }
//!                 Point::Loop if self.x > 0 => {
//!                     self.x -= 1;
//!                     self.seen.push(self.x);
//!                     return Step::Delay(Duration::from_millis(5));
//!                 }
//!                 Point::Loop => self.at = Point::End,
//!                 Point::End => return Step::Done,
//!             }
//!         }
//!     }
//! }
//!
//! let mut rt = tickloop::Runtime::new();
//! let task = rt.handle().worker(Countdown { at: Point::Start, x: 0, seen: Vec::new() });
//! rt.run();
//! assert!(task.is_done());
//! ```

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// What a coroutine asks for when it hands control back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Stay ready; resume on the next tick.
    Yield,
    /// Sleep for at least the given duration, then resume.
    Delay(Duration),
    /// The body finished. The coroutine is dropped and never resumed again.
    Done,
}

/// A resumable computation driven by the scheduler.
pub trait Coroutine {
    /// Runs the body from its current resumption point up to the next
    /// suspension point.
    fn resume(&mut self) -> Step;
}

impl<C: Coroutine + ?Sized> Coroutine for Box<C> {
    fn resume(&mut self) -> Step {
        (**self).resume()
    }
}

/// Coroutine built from a closure; see [`from_fn`].
pub struct FromFn<F> {
    body: F,
}

impl<F> Coroutine for FromFn<F>
where
    F: FnMut() -> Step,
{
    fn resume(&mut self) -> Step {
        (self.body)()
    }
}

impl<F> fmt::Debug for FromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

/// Wraps a closure as a coroutine.
///
/// State captured by value with `move` persists across suspensions, which is
/// enough for small bodies that track their position in a counter.
pub fn from_fn<F>(body: F) -> FromFn<F>
where
    F: FnMut() -> Step,
{
    FromFn { body }
}

/// Lifecycle of a submitted coroutine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Queued for resumption on a tick.
    Ready,
    /// Suspended until the given instant.
    Waiting(Instant),
    /// Finished; terminal.
    Done,
}

/// Which admission point submitted a coroutine.
///
/// Both owners feed the same ready queue; the distinction is only recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskOwner {
    /// Submitted through a worker pool.
    Worker,
    /// Submitted by the top-level program.
    Process,
}

impl fmt::Display for TaskOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOwner::Worker => f.write_str("worker"),
            TaskOwner::Process => f.write_str("process"),
        }
    }
}

/// Identifier of a submitted coroutine, unique within one runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Observer handle returned by submission.
///
/// The handle does not own the coroutine; it stays valid (reporting
/// [`TaskState::Done`]) after the coroutine has been dropped.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) id: TaskId,
    pub(crate) owner: TaskOwner,
    pub(crate) state: Rc<Cell<TaskState>>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn owner(&self) -> TaskOwner {
        self.owner
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn is_done(&self) -> bool {
        self.state.get() == TaskState::Done
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("state", &self.state.get())
            .finish()
    }
}
