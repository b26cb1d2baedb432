//! Single-threaded cooperative runtime: coroutines, timers, promises, events
//! and supervised processes sharing one tick loop.
//!
//! # Architecture
//!
//! - **Runtime**: owns all core state and drives it one tick at a time
//! - **Handle**: clonable reference used by callbacks to submit work
//! - **TimerWheel**: deadline-ordered one-shot timers, the only source of delays
//! - **Coroutine**: explicit state machines resumed by the scheduler
//! - **Promise**: one-shot results with chainable reactions
//! - **EventEmitter**: named listener lists with persistent and one-shot entries
//! - **Supervisor**: keeps N instances of each external command running
//! - **RuntimeBuilder**: fluent construction from a [`RuntimeConfig`]
//!
//! A tick delivers messages from OS helper threads, fires due timers (which
//! moves expired coroutines back to ready), then resumes every ready coroutine
//! once. Anything made ready during that pass waits for the next tick.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use tickloop::coroutine::{self, Step};
//! use tickloop::Runtime;
//!
//! let mut rt = Runtime::new();
//! let mut x = 3;
//! let task = rt.handle().process(coroutine::from_fn(move || {
//!     if x == 0 {
//!         return Step::Done;
//!     }
//!     x -= 1;
//!     Step::Delay(Duration::from_millis(1))
//! }));
//!
//! rt.run();
//! assert!(task.is_done());
//! ```

mod builder;
mod config;
pub mod coroutine;
mod error;
mod event;
pub mod process;
mod promise;
mod runtime;
pub mod signal;
mod timer;

pub use builder::RuntimeBuilder;
pub use config::{RejectionPolicy, RuntimeConfig};
pub use coroutine::{Coroutine, Step, TaskHandle, TaskId, TaskOwner, TaskState};
pub use error::{SignalError, SpawnError};
pub use event::{EventEmitter, ListenerId};
pub use process::{
    CommandSpec, InstanceId, OsSpawner, Pid, ProcessEvent, ProcessEventKind, ProcessOutput,
    ProcessSink, ShutdownToken, Spawner, Supervisor, SupervisorConfig,
};
pub use promise::{Promise, PromiseState, Rejecter, Resolver};
pub use runtime::{
    Handle, Runtime, TickReport, cancel, current, process, schedule, try_current, worker,
};
pub use timer::{TimerHandle, TimerWheel};
