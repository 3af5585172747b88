use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    DynError, HarnessConfig,
    nodes::{
        ManagedService,
        chain::{ChainError, ChainNode},
        client::{ClientError, ClientStack},
        index_server::{IndexError, IndexServer},
    },
    scheduler::{Scheduler, SchedulerError},
};

/// A step run against the chain around its start.
pub type ChainHook =
    Box<dyn for<'a> FnOnce(&'a mut ChainNode) -> BoxFuture<'a, Result<(), DynError>> + Send>;

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("startup hook failed: {0}")]
    Hook(DynError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StackState {
    #[default]
    Uninitialized,
    ChainStarting,
    ChainReady,
    IndexStarting,
    ClientStarting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    Client,
    Scheduler,
    IndexServer,
    Chain,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Scheduler => "scheduler",
            Self::IndexServer => "index server",
            Self::Chain => "chain",
        })
    }
}

/// Optional steps around the chain's start.
///
/// Without an after-chain hook the stack mines the configured seed blocks.
#[derive(Default)]
pub struct StartupHooks {
    before_chain_start: Option<ChainHook>,
    after_chain_start: Option<ChainHook>,
}

impl StartupHooks {
    /// Runs once the chain directory exists, before the daemon is launched.
    #[must_use]
    pub fn before_chain_start<F>(mut self, hook: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut ChainNode) -> BoxFuture<'a, Result<(), DynError>>
            + Send
            + 'static,
    {
        self.before_chain_start = Some(Box::new(hook));
        self
    }

    /// Runs once the daemon is ready, in place of mining the seed blocks.
    #[must_use]
    pub fn after_chain_start<F>(mut self, hook: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut ChainNode) -> BoxFuture<'a, Result<(), DynError>>
            + Send
            + 'static,
    {
        self.after_chain_start = Some(Box::new(hook));
        self
    }
}

/// Everything that went wrong while stopping a stack.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    failures: Vec<(Component, DynError)>,
}

impl ShutdownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn failures(&self) -> &[(Component, DynError)] {
        &self.failures
    }

    fn record(&mut self, component: Component, outcome: Result<(), DynError>) {
        if let Err(error) = outcome {
            warn!("stopping {component} failed: {error}");
            self.failures.push((component, error));
        }
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return f.write_str("clean shutdown");
        }
        let summary = self
            .failures
            .iter()
            .map(|(component, error)| format!("{component}: {error}"))
            .collect::<Vec<_>>()
            .join("\n");
        f.write_str(&summary)
    }
}

/// The chain, index server and wallet daemon of one test run, started in
/// dependency order and stopped in reverse.
pub struct ServiceStack {
    config: Arc<HarnessConfig>,
    chain: ChainNode,
    index: IndexServer,
    client: ClientStack,
    scheduler: Scheduler,
    state: StackState,
}

impl ServiceStack {
    #[must_use]
    pub fn new(config: Arc<HarnessConfig>) -> Self {
        Self {
            chain: ChainNode::new(Arc::clone(&config)),
            index: IndexServer::new(Arc::clone(&config)),
            client: ClientStack::new(Arc::clone(&config)),
            scheduler: Scheduler::new(),
            state: StackState::Uninitialized,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> StackState {
        self.state
    }

    #[must_use]
    pub const fn chain(&self) -> &ChainNode {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut ChainNode {
        &mut self.chain
    }

    #[must_use]
    pub const fn index(&self) -> &IndexServer {
        &self.index
    }

    #[must_use]
    pub const fn client(&self) -> &ClientStack {
        &self.client
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Brings the stack up step by step. The first failing step is returned
    /// and nothing is rolled back; call [`Self::shutdown`] afterwards.
    pub async fn startup(&mut self, hooks: StartupHooks) -> Result<(), StackError> {
        self.scheduler.setup()?;

        self.state = StackState::ChainStarting;
        self.chain.setup()?;
        if let Some(hook) = hooks.before_chain_start {
            hook(&mut self.chain).await.map_err(StackError::Hook)?;
        }
        self.chain.start().await?;

        self.state = StackState::ChainReady;
        match hooks.after_chain_start {
            Some(hook) => hook(&mut self.chain).await.map_err(StackError::Hook)?,
            None => {
                self.chain.generate(self.config.seed_blocks).await?;
            }
        }

        self.state = StackState::IndexStarting;
        let chain_dir = self.chain.data_dir()?.to_owned();
        self.index.start(&chain_dir).await?;

        self.state = StackState::ClientStarting;
        let endpoint = self.index.endpoint();
        self.client.start(&endpoint, &self.scheduler).await?;

        self.state = StackState::Running;
        info!("service stack running");
        Ok(())
    }

    /// Stops the client, the scheduler, the index server and the chain, in
    /// that order, attempting every step regardless of earlier failures.
    pub async fn shutdown(&mut self, cleanup: bool) -> ShutdownReport {
        self.state = StackState::Stopping;
        let mut report = ShutdownReport::default();
        let services: [(Component, &mut dyn ManagedService); 4] = [
            (Component::Client, &mut self.client),
            (Component::Scheduler, &mut self.scheduler),
            (Component::IndexServer, &mut self.index),
            (Component::Chain, &mut self.chain),
        ];
        for (component, service) in services {
            debug!(service = service.name(), cleanup, "stopping");
            report.record(component, service.stop(cleanup).await);
        }
        self.state = StackState::Stopped;
        if report.is_clean() {
            info!("service stack stopped");
        }
        report
    }

    /// Puts the wallet backup `name` in place and restarts the client.
    pub async fn restore_wallet(&mut self, name: &str) -> Result<(), ClientError> {
        self.client.restore_wallet(name, &self.scheduler).await
    }
}
