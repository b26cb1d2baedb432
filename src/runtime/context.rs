//! Thread-local runtime context.
//!
//! While a [`Runtime`](crate::Runtime) ticks (or inside
//! [`Runtime::enter`](crate::Runtime::enter)) its [`Handle`] is installed in
//! thread-local storage, so timer callbacks, listeners, promise reactions and
//! coroutine bodies can reach the runtime without threading a handle through
//! every closure. The previous context is restored on exit, which keeps nested
//! runtimes on one thread independent.

use crate::coroutine::{Coroutine, TaskHandle};
use crate::runtime::Handle;
use crate::timer::TimerHandle;

use std::cell::RefCell;
use std::time::Duration;

thread_local! {
    /// Handle of the runtime currently ticking on this thread.
    static CURRENT: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Runs `function` with `handle` installed as the current runtime.
pub(crate) fn enter_context<F, R>(handle: Handle, function: F) -> R
where
    F: FnOnce() -> R,
{
    let previous = CURRENT.with(|current| current.borrow_mut().replace(handle));

    // Restored on unwind too.
    struct Restore(Option<Handle>);
    impl Drop for Restore {
        fn drop(&mut self) {
            let previous = self.0.take();
            CURRENT.with(|current| *current.borrow_mut() = previous);
        }
    }
    let _restore = Restore(previous);

    function()
}

/// Returns the handle of the runtime ticking on this thread, if any.
pub fn try_current() -> Option<Handle> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Returns the handle of the runtime ticking on this thread.
///
/// # Panics
/// Panics when called outside [`Runtime::tick`](crate::Runtime::tick),
/// [`Runtime::run`](crate::Runtime::run) or [`Runtime::enter`](crate::Runtime::enter).
pub fn current() -> Handle {
    try_current().expect("no tickloop runtime on this thread; call from inside Runtime::run or Runtime::enter")
}

/// Schedules a one-shot timer on the current runtime.
///
/// # Panics
/// Panics outside a runtime context, see [`current`].
pub fn schedule<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() + 'static,
{
    current().schedule(delay, callback)
}

/// Cancels a timer on the current runtime. Idempotent.
///
/// # Panics
/// Panics outside a runtime context, see [`current`].
pub fn cancel(timer: TimerHandle) -> bool {
    current().cancel(timer)
}

/// Submits a coroutine through the worker admission point of the current runtime.
///
/// # Panics
/// Panics outside a runtime context, see [`current`].
pub fn worker<C>(coroutine: C) -> TaskHandle
where
    C: Coroutine + 'static,
{
    current().worker(coroutine)
}

/// Submits a coroutine through the top-level process admission point of the
/// current runtime.
///
/// # Panics
/// Panics outside a runtime context, see [`current`].
pub fn process<C>(coroutine: C) -> TaskHandle
where
    C: Coroutine + 'static,
{
    current().process(coroutine)
}
