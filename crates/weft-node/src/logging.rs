//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::EnvFilter;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a console `fmt` subscriber filtered at `level`.
///
/// Call this once at startup, before any `tracing` events are emitted.
/// Panics if a global subscriber is already set.
pub fn init(level: &str) {
    tracing_subscriber::fmt().with_env_filter(filter(level)).init();
}

/// Like [`init`], but returns `false` instead of panicking when a
/// subscriber is already installed. Output goes through the test writer.
pub fn try_init(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_test_writer()
        .try_init()
        .is_ok()
}
