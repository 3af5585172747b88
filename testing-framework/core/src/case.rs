use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::{
    DynError, HarnessConfig,
    config::ConfigError,
    fixture,
    logging,
    nodes::{
        chain::ChainNode,
        client::{ClientError, ClientStack, Wallet},
    },
    orchestrator::{ServiceStack, ShutdownReport, StackError, StartupHooks},
};

#[derive(Debug, Error)]
pub enum CaseError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Stack(#[from] StackError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaseOptions {
    pub verbose: bool,
    /// Seed the chain from the fixture archive instead of mining fresh blocks.
    pub use_fixture: bool,
}

/// A running stack for one end-to-end test.
pub struct IntegrationCase {
    stack: ServiceStack,
}

impl IntegrationCase {
    /// Starts a stack configured from the environment.
    pub async fn set_up(options: CaseOptions) -> Result<Self, CaseError> {
        logging::init_for_tests();
        let mut config = HarnessConfig::from_env()?;
        config.verbose |= options.verbose;
        config.timeouts = config.timeouts.adjusted();
        Self::set_up_with(Arc::new(config), options.use_fixture).await
    }

    /// Starts a stack with `config`. A failed startup is shut down before the
    /// error is returned.
    pub async fn set_up_with(
        config: Arc<HarnessConfig>,
        use_fixture: bool,
    ) -> Result<Self, CaseError> {
        let hooks = startup_hooks(&config, use_fixture);
        let mut stack = ServiceStack::new(config);
        if let Err(error) = stack.startup(hooks).await {
            let report = stack.shutdown(true).await;
            if !report.is_clean() {
                warn!("shutdown after failed startup:\n{report}");
            }
            return Err(error.into());
        }
        Ok(Self { stack })
    }

    pub async fn tear_down(mut self) -> ShutdownReport {
        self.stack.shutdown(true).await
    }

    #[must_use]
    pub const fn stack(&self) -> &ServiceStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ServiceStack {
        &mut self.stack
    }

    #[must_use]
    pub const fn chain(&self) -> &ChainNode {
        self.stack.chain()
    }

    #[must_use]
    pub const fn client(&self) -> &ClientStack {
        self.stack.client()
    }

    pub fn wallet(&self) -> Result<&Wallet, ClientError> {
        self.stack.client().wallet()
    }
}

/// With a fixture the archive is unpacked before the chain starts and the
/// archived history stands in for the seed blocks; otherwise the stack mines
/// them itself.
fn startup_hooks(config: &HarnessConfig, use_fixture: bool) -> StartupHooks {
    if !use_fixture {
        return StartupHooks::default();
    }
    let archive = fixture::archive_path(config);
    StartupHooks::default()
        .before_chain_start(move |chain| {
            Box::pin(async move {
                fixture::extract_into(&archive, chain).await?;
                Ok::<_, DynError>(())
            })
        })
        .after_chain_start(|_| Box::pin(async { Ok::<_, DynError>(()) }))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serial_test::serial;

    use super::*;
    use crate::{
        archive,
        test_utils::{FAKE_CHAIN_DAEMON, fake_chain_bin_dir, test_config},
    };

    #[tokio::test]
    #[serial]
    async fn failed_set_up_reports_the_startup_error() {
        let bin = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(bin.path(), bin.path()));
        assert!(matches!(
            IntegrationCase::set_up_with(config, false).await,
            Err(CaseError::Stack(StackError::Chain(_)))
        ));
    }

    #[tokio::test]
    #[serial]
    async fn fixture_history_replaces_seed_blocks() {
        let bin = fake_chain_bin_dir(FAKE_CHAIN_DAEMON);
        let data = tempfile::tempdir().unwrap();
        let config = test_config(bin.path(), data.path());

        let history = tempfile::tempdir().unwrap();
        fs::create_dir_all(history.path().join("regtest")).unwrap();
        fs::write(history.path().join("regtest/height"), "42\n").unwrap();
        archive::zip_dir(history.path(), &fixture::archive_path(&config)).unwrap();

        let hooks = startup_hooks(&config, true);
        let mut stack = ServiceStack::new(Arc::new(config));
        // No index server binary: startup stops after the chain.
        assert!(matches!(
            stack.startup(hooks).await,
            Err(StackError::Index(_))
        ));
        assert_eq!(stack.chain().block_count().await.unwrap(), 42);
        assert!(stack.shutdown(true).await.is_clean());
    }
}
