//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Installs a fmt subscriber writing through the test harness, once per binary.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::DEBUG);
}

pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}
