pub mod amount;
pub mod archive;
pub mod case;
pub mod config;
pub mod fixture;
pub mod logging;
pub mod nodes;
pub mod orchestrator;
pub mod poll;
pub mod process;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_utils;

use std::{env, error::Error, ops::Mul as _, sync::LazyLock, time::Duration};

pub use amount::Amount;
pub use case::{CaseError, CaseOptions, IntegrationCase};
pub use config::HarnessConfig;
pub use fixture::{Fixture, FixtureConfig};
pub use nodes::{chain::ChainNode, client::ClientStack, index_server::IndexServer};
pub use orchestrator::{
    Component, ServiceStack, ShutdownReport, StackError, StackState, StartupHooks,
};

pub type DynError = Box<dyn Error + Send + Sync + 'static>;

static IS_SLOW_TEST_ENV: LazyLock<bool> =
    LazyLock::new(|| env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true"));

pub static IS_DEBUG_TRACING: LazyLock<bool> = LazyLock::new(|| {
    env::var("ORCHSTR8_TESTS_TRACING").is_ok_and(|val| val.eq_ignore_ascii_case("true"))
});

/// In slow test environments like Codecov, use 2x timeout.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *IS_SLOW_TEST_ENV { d.mul(2) } else { d }
}
