//! Error types raised by the runtime's outer edges.
//!
//! The scheduler, timer wheel, emitter and promises do not fail: invariant
//! violations are assertions, and promise rejections carry the application's
//! own error type. Only the OS-facing pieces produce errors:
//!
//! - [`SpawnError`] for launching or signalling supervised processes.
//! - [`SignalError`] for installing the shutdown signal handlers.

use thiserror::Error;

/// Errors produced while launching or signalling a supervised process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The OS refused to start the command.
    #[error("failed to spawn `{command}`: {source}")]
    Launch {
        /// Display form of the command line.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Sending a signal to a running instance failed.
    #[error("failed to kill pid {pid}: {source}")]
    Kill {
        /// Target process id.
        pid: u32,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A scripted or external spawner rejected the request.
    #[error("spawner rejected `{command}`: {reason}")]
    Rejected {
        /// Display form of the command line.
        command: String,
        /// Why the spawner refused.
        reason: String,
    },
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use tickloop::SpawnError;
    ///
    /// let err = SpawnError::Rejected { command: "x".into(), reason: "busy".into() };
    /// assert_eq!(err.as_label(), "spawn_rejected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::Launch { .. } => "spawn_launch_failed",
            SpawnError::Kill { .. } => "spawn_kill_failed",
            SpawnError::Rejected { .. } => "spawn_rejected",
        }
    }
}

/// Errors produced while installing OS signal handlers.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SignalError {
    /// `signal(2)` returned `SIG_ERR` for the given signal number.
    #[error("failed to install handler for signal {signal}: {source}")]
    Install {
        /// The signal number.
        signal: i32,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl SignalError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SignalError::Install { .. } => "signal_install_failed",
        }
    }
}
