//! OS termination signals.
//!
//! [`install`] registers a handler for `SIGINT`, `SIGTERM` and `SIGQUIT`. The
//! handler only stores into an atomic flag, which is all that is
//! async-signal-safe; a runtime built with
//! [`RuntimeBuilder::handle_signals`](crate::RuntimeBuilder::handle_signals)
//! picks the flag up at its next tick and flips its
//! [`ShutdownToken`](crate::ShutdownToken). Supervised processes keep running;
//! only their respawning stops.

use crate::error::SignalError;

use std::sync::atomic::{AtomicBool, Ordering};

static PENDING: AtomicBool = AtomicBool::new(false);

/// Signals that request shutdown.
pub const SHUTDOWN_SIGNALS: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT];

extern "C" fn on_signal(_signal: libc::c_int) {
    PENDING.store(true, Ordering::SeqCst);
}

/// Installs the shutdown handler for every signal in [`SHUTDOWN_SIGNALS`].
///
/// Installing more than once is harmless.
///
/// # Errors
/// Returns [`SignalError::Install`] if the OS rejects a handler.
pub fn install() -> Result<(), SignalError> {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;

    for signal in SHUTDOWN_SIGNALS {
        // SAFETY: `on_signal` only touches an atomic, which is async-signal-safe.
        let previous = unsafe { libc::signal(signal, handler) };
        if previous == libc::SIG_ERR {
            return Err(SignalError::Install {
                signal,
                source: std::io::Error::last_os_error(),
            });
        }
    }

    Ok(())
}

/// Consumes a pending shutdown request.
pub(crate) fn take_pending() -> bool {
    PENDING.swap(false, Ordering::SeqCst)
}
