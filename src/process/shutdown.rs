use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared "stop respawning" flag.
///
/// Every supervisor slot holds a clone and reads it at the moment an instance
/// exits, so a shutdown that races an exit is resolved by whichever happened
/// first at that point. Setting the token never kills running processes.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    /// Creates an active (not shut down) token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to shutting down. Returns `true` for the call that flipped it.
    pub fn shutdown(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flips_once_for_all_clones() {
        let token = ShutdownToken::new();
        let slot = token.clone();

        assert!(!slot.is_shutdown());
        assert!(token.shutdown());
        assert!(!token.shutdown());
        assert!(slot.is_shutdown());
    }
}
