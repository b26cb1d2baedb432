//! The runtime: tick loop, shared state, ready queue and thread-local context.

pub(crate) mod context;
mod core;
mod handle;
pub(crate) mod queue;

pub(crate) use context::enter_context;
pub use context::{cancel, current, process, schedule, try_current, worker};
pub use core::{Runtime, TickReport};
pub use handle::Handle;
