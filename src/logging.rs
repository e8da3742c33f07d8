//! Log setup for test binaries.

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber for tests.
///
/// The filter comes from `RUST_LOG` (default `warn`). Output goes through the
/// test harness's capture. Safe to call from every test: only the first call
/// installs anything.
pub fn init_test_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Like [`init_test_logs`] but emits JSON lines, for CI log collectors.
pub fn init_json_logs() {
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
