//! Logging infrastructure for vigil
//!
//! The daemon logs to stdout with timestamps; launchd owns the redirect of
//! stderr into the error log file, so no file appender is configured here.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging system.
///
/// Level comes from `VIGIL_LOG`, then `RUST_LOG`, then the given default.
pub fn init(default_level: &str) {
    let filter = std::env::var("VIGIL_LOG")
        .ok()
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .init();
}

/// Initialize logging for tests (captured per test).
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
