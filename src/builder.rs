//! Fluent builder for Runtime construction.

use crate::config::{RejectionPolicy, RuntimeConfig};
use crate::error::SignalError;
use crate::runtime::Runtime;
use crate::signal;

use std::time::Duration;

/// Builder for constructing [`Runtime`] instances with a fluent API.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use tickloop::{RejectionPolicy, RuntimeBuilder};
///
/// let rt = RuntimeBuilder::new()
///     .rejection_policy(RejectionPolicy::Collect)
///     .max_park(Duration::from_millis(20))
///     .build()
///     .unwrap();
/// # drop(rt);
/// ```
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Creates a builder with [`RuntimeConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how unobserved promise rejections are reported.
    pub fn rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.config.rejection_policy = policy;
        self
    }

    /// Caps a single idle park of the run loop.
    pub fn max_park(mut self, max_park: Duration) -> Self {
        self.config.max_park = max_park;
        self
    }

    /// Installs SIGINT/SIGTERM/SIGQUIT handlers that flip the runtime's
    /// shutdown token.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.config.handle_signals = enabled;
        self
    }

    /// Builds the runtime.
    ///
    /// # Errors
    /// Returns [`SignalError`] when signal handling was requested and a handler
    /// could not be installed.
    pub fn build(self) -> Result<Runtime, SignalError> {
        if self.config.handle_signals {
            signal::install()?;
        }

        Ok(Runtime::with_config(self.config))
    }
}
