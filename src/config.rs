//! Runtime configuration.
//!
//! [`RuntimeConfig`] centralizes the knobs of a [`Runtime`](crate::Runtime).
//! It is normally filled through [`RuntimeBuilder`](crate::RuntimeBuilder),
//! but all fields are public for callers that prefer a struct literal.

use std::time::Duration;

/// What to do with a promise that was rejected and never observed.
///
/// A rejection counts as unobserved when no reaction was ever attached to the
/// promise before its last handle was dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Drop the rejection silently.
    Ignore,
    /// Emit a `tracing::warn!` with the formatted error.
    #[default]
    Log,
    /// Store the formatted error in the runtime; read it back with
    /// [`Runtime::take_unhandled_rejections`](crate::Runtime::take_unhandled_rejections).
    Collect,
}

/// Global configuration for a runtime instance.
///
/// ## Field semantics
/// - `rejection_policy`: handling of unobserved promise rejections.
/// - `max_park`: upper bound for one idle wait inside [`Runtime::run`](crate::Runtime::run).
/// - `handle_signals`: install SIGINT/SIGTERM/SIGQUIT handlers when the runtime is built.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Policy for unobserved promise rejections.
    pub rejection_policy: RejectionPolicy,

    /// Longest single park while waiting for a timer or an external event.
    ///
    /// Bounds how late a pending OS signal can be noticed when nothing else
    /// wakes the loop.
    pub max_park: Duration,

    /// Whether [`RuntimeBuilder::build`](crate::RuntimeBuilder::build) installs
    /// the shutdown signal handlers.
    pub handle_signals: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rejection_policy: RejectionPolicy::default(),
            max_park: Duration::from_millis(100),
            handle_signals: false,
        }
    }
}
