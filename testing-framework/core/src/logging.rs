use tracing_subscriber::{EnvFilter, fmt::TestWriter};

use crate::IS_DEBUG_TRACING;

/// Installs a global fmt subscriber. `RUST_LOG` overrides the default level.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Test-side variant: captured by the test harness, enabled by
/// `ORCHSTR8_TESTS_TRACING=true`.
pub fn init_for_tests() {
    if !*IS_DEBUG_TRACING {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(TestWriter::default())
        .try_init();
}
