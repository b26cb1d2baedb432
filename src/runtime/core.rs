//! The tick loop.
//!
//! One [`Runtime::tick`] is:
//!
//! 1. deliver messages handed over by other threads (process output, exits),
//! 2. move a pending OS shutdown signal into the shutdown token,
//! 3. fire due timers, which promotes expired waiting coroutines to ready,
//! 4. resume every coroutine that was ready at this point exactly once.
//!
//! Work made ready while step 4 runs (yields, new submissions) waits for the
//! next tick, so a tick always terminates.

use crate::config::RuntimeConfig;
use crate::process::ShutdownToken;
use crate::runtime::{Handle, enter_context};
use crate::signal;

use std::time::Instant;

use tracing::{debug, info, trace};

/// What one tick did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Messages delivered from other threads.
    pub external: usize,
    /// Timer callbacks run.
    pub timers_fired: usize,
    /// Coroutines resumed.
    pub resumed: usize,
    /// Coroutines that reached `Done`.
    pub completed: usize,
}

/// Single-threaded cooperative runtime.
///
/// Owns the coroutine table, timer wheel, ready queue and cross-thread inbox.
/// Drive it with [`tick`](Self::tick), [`run`](Self::run) or
/// [`run_until`](Self::run_until).
pub struct Runtime {
    handle: Handle,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    ///
    /// # Example
    /// ```
    /// let mut rt = tickloop::Runtime::new();
    /// rt.run();
    /// ```
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub(crate) fn with_config(config: RuntimeConfig) -> Self {
        Self {
            handle: Handle::new(config, ShutdownToken::new()),
        }
    }

    /// Returns a handle for submitting work from callbacks.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// The runtime's shutdown token.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.handle.shutdown_token()
    }

    /// Runs `function` with this runtime installed as the current one, without
    /// ticking. Useful to set up promises and timers through the free
    /// functions before driving the loop.
    pub fn enter<F, R>(&self, function: F) -> R
    where
        F: FnOnce() -> R,
    {
        enter_context(self.handle.clone(), function)
    }

    /// Performs exactly one tick.
    pub fn tick(&mut self) -> TickReport {
        let handle = self.handle.clone();

        enter_context(handle.clone(), || {
            let mut report = TickReport {
                external: handle.deliver_external(),
                ..TickReport::default()
            };

            if handle.config().handle_signals
                && signal::take_pending()
                && handle.shutdown_token().shutdown()
            {
                info!("shutdown signal received");
            }

            report.timers_fired = handle.fire_timers(Instant::now());

            for id in handle.take_ready_batch() {
                report.resumed += 1;
                if handle.resume(id) {
                    report.completed += 1;
                }
            }

            trace!(?report, "tick");
            report
        })
    }

    /// Ticks until the runtime is idle.
    ///
    /// Idle means no ready coroutine, no armed timer and no external source
    /// (such as a supervised process) that may still deliver. Between ticks
    /// with nothing ready the thread parks until the next timer deadline or
    /// the next external message, at most [`RuntimeConfig::max_park`].
    pub fn run(&mut self) {
        debug!("runtime loop started");

        loop {
            self.tick();

            if self.handle.has_ready() {
                continue;
            }
            if self.handle.is_idle() {
                break;
            }

            self.park();
        }

        debug!("runtime idle");
    }

    /// Ticks until `done` returns `true` or the runtime goes idle.
    ///
    /// Returns whether `done` held.
    pub fn run_until<F>(&mut self, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        loop {
            if done() {
                return true;
            }

            self.tick();

            if done() {
                return true;
            }
            if self.handle.has_ready() {
                continue;
            }
            if self.handle.is_idle() {
                return false;
            }

            self.park();
        }
    }

    /// Returns `true` when nothing is ready, armed or outstanding.
    pub fn is_idle(&self) -> bool {
        self.handle.is_idle()
    }

    /// Drains the unhandled rejections recorded under
    /// [`RejectionPolicy::Collect`](crate::RejectionPolicy::Collect).
    pub fn take_unhandled_rejections(&self) -> Vec<String> {
        std::mem::take(&mut *self.handle.rejection_sink().borrow_mut())
    }

    fn park(&self) {
        let mut timeout = self.handle.config().max_park;
        if let Some(deadline) = self.handle.next_deadline() {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }

        if !timeout.is_zero() {
            self.handle.inbox().wait(timeout);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.clear();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("handle", &self.handle)
            .finish()
    }
}
