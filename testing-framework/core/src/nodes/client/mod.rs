pub mod wallet;

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{info, trace, warn};

pub use self::wallet::{DaemonStatus, Wallet, WalletError};
use super::{
    ManagedService, create_workdir, remove_workdir,
    stratum::{StratumClient, StratumError},
    wait_until_closed,
};
use crate::{
    DynError, HarnessConfig,
    poll::wait_for,
    process::{NoMarkers, OutputFilter, ProcessError, ProcessHandle, ProcessSpec},
    scheduler::{Scheduler, SchedulerError},
};

const SETTINGS_FILE: &str = "daemon_settings.yml";
const WALLET_DIR: &str = "lbryum";
const DOWNLOAD_DIR: &str = "Downloads";
const DEFAULT_WALLET: &str = "default_wallet";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("wallet daemon has not been started")]
    NotStarted,
    #[error("wallet daemon failed to start: {reason}")]
    StartupFailed { reason: String },
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing {path}: {source}")]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("wallet backup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("client teardown failed: {}", join_failures(.0))]
    Teardown(Vec<DynError>),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Stratum(#[from] StratumError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

fn join_failures(failures: &[DynError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn io_error<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> ClientError + 'a {
    move |source| ClientError::Io {
        action,
        path: path.to_owned(),
        source,
    }
}

/// Settings file handed to the daemon with `--conf`.
#[derive(Debug, Serialize)]
struct DaemonSettings<'a> {
    data_dir: PathBuf,
    lbryum_wallet_dir: PathBuf,
    download_directory: PathBuf,
    use_upnp: bool,
    blockchain_name: &'a str,
    lbryum_servers: Vec<&'a str>,
    known_dht_nodes: Vec<String>,
    api_port: u16,
    use_auth_http: bool,
}

/// A started daemon: its status when the session came up and a wallet client.
pub struct Session {
    status: DaemonStatus,
    wallet: Arc<Wallet>,
    heartbeat: AbortHandle,
}

impl Session {
    #[must_use]
    pub const fn status(&self) -> &DaemonStatus {
        &self.status
    }

    #[must_use]
    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }
}

/// The wallet daemon, its data directory and, once started, its session.
pub struct ClientStack {
    config: Arc<HarnessConfig>,
    data_dir: Option<PathBuf>,
    process: Option<ProcessHandle>,
    session: Option<Session>,
    stratum: Option<StratumClient>,
}

impl ClientStack {
    #[must_use]
    pub const fn new(config: Arc<HarnessConfig>) -> Self {
        Self {
            config,
            data_dir: None,
            process: None,
            session: None,
            stratum: None,
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    #[must_use]
    pub fn wallet_dir(&self) -> Option<PathBuf> {
        self.data_dir().map(|dir| dir.join(WALLET_DIR))
    }

    #[must_use]
    pub fn download_dir(&self) -> Option<PathBuf> {
        self.data_dir().map(|dir| dir.join(DOWNLOAD_DIR))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.is_some()
            && self
                .process
                .as_ref()
                .is_some_and(|process| !process.has_exited())
    }

    pub fn session(&self) -> Result<&Session, ClientError> {
        self.session.as_ref().ok_or(ClientError::NotStarted)
    }

    pub fn wallet(&self) -> Result<&Wallet, ClientError> {
        Ok(self.session()?.wallet())
    }

    fn api_addr(&self) -> String {
        format!("{}:{}", self.config.client.api_host, self.config.client.api_port)
    }

    /// Raw passthrough to the index server the daemon is connected to.
    pub async fn stratum_command(&self, method: &str, params: &[Value]) -> Result<Value, ClientError> {
        let stratum = self.stratum.as_ref().ok_or(ClientError::NotStarted)?;
        Ok(stratum.call(method, params).await?)
    }

    fn prepare_data_dir(&mut self) -> Result<PathBuf, ClientError> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => {
                let tmp = std::env::temp_dir();
                let dir = create_workdir("lbrynet-").map_err(io_error("creating", &tmp))?;
                self.data_dir = Some(dir.clone());
                dir
            }
        };
        let wallet_dir = dir.join(WALLET_DIR);
        for sub in [wallet_dir.join("wallets"), dir.join(DOWNLOAD_DIR), dir.join("lbrynet")] {
            fs::create_dir_all(&sub).map_err(io_error("creating", &sub))?;
        }
        let headers = wallet_dir.join("regtest_headers");
        if !headers.exists() {
            fs::write(&headers, b"").map_err(io_error("creating", &headers))?;
        }
        Ok(dir)
    }

    fn write_settings(&self, dir: &Path, stratum_endpoint: &str) -> Result<PathBuf, ClientError> {
        let client = &self.config.client;
        let settings = DaemonSettings {
            data_dir: dir.join("lbrynet"),
            lbryum_wallet_dir: dir.join(WALLET_DIR),
            download_directory: dir.join(DOWNLOAD_DIR),
            use_upnp: client.use_upnp,
            blockchain_name: &client.blockchain_name,
            lbryum_servers: vec![stratum_endpoint],
            known_dht_nodes: Vec::new(),
            api_port: client.api_port,
            use_auth_http: false,
        };
        let path = dir.join(SETTINGS_FILE);
        let yaml = serde_yaml::to_string(&settings).map_err(|source| ClientError::Settings {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, yaml).map_err(io_error("writing", &path))?;
        Ok(path)
    }

    /// Prepares the data directory, launches the daemon pointed at
    /// `stratum_endpoint` and waits for its session to come up.
    pub async fn start(
        &mut self,
        stratum_endpoint: &str,
        scheduler: &Scheduler,
    ) -> Result<(), ClientError> {
        if self.is_running() {
            return Ok(());
        }
        let dir = self.prepare_data_dir()?;
        let settings = self.write_settings(&dir, stratum_endpoint)?;

        let spec = ProcessSpec::new("lbrynet-daemon", self.config.client_path())
            .args(["--conf".to_owned(), settings.display().to_string()])
            .current_dir(&dir);
        let process = ProcessHandle::launch(
            &spec,
            Arc::new(NoMarkers),
            OutputFilter::new(self.config.verbose, Vec::new()),
        )?;

        let timeouts = self.config.timeouts;
        let wallet = Arc::new(Wallet::new(
            &self.config.client.api_host,
            self.config.client.api_port,
            timeouts,
        ));
        let session = wait_for(
            "wallet daemon session",
            timeouts.poll_interval,
            timeouts.session,
            || async {
                if process.has_exited() {
                    return Ok(Some(None));
                }
                let status = wallet.status().await?;
                Ok::<_, WalletError>(status.is_running.then_some(Some(status)))
            },
        )
        .await;

        let reason = match session {
            Ok(Some(status)) => {
                let heartbeat = scheduler.call_every(
                    self.config.client.heartbeat_interval,
                    heartbeat(Arc::clone(&wallet)),
                )?;
                info!(data_dir = %dir.display(), "wallet daemon session started");
                self.process = Some(process);
                self.session = Some(Session {
                    status,
                    wallet,
                    heartbeat,
                });
                self.stratum = Some(StratumClient::with_endpoint(
                    stratum_endpoint.to_owned(),
                    timeouts.rpc,
                ));
                return Ok(());
            }
            Ok(None) => "daemon exited before its session started".to_owned(),
            Err(error) => error.to_string(),
        };
        if let Err(error) = process
            .terminate(self.config.chain.stop_signal, timeouts.process_exit)
            .await
        {
            warn!("stopping failed wallet daemon: {error}");
        }
        Err(ClientError::StartupFailed { reason })
    }

    /// Ends the session, stops the process and waits for the API port to
    /// close. Every step runs even when an earlier one failed.
    pub async fn stop(&mut self, cleanup: bool) -> Result<(), ClientError> {
        let mut failures: Vec<DynError> = Vec::new();
        let timeouts = self.config.timeouts;

        if let Some(session) = self.session.take() {
            session.heartbeat.abort();
            if let Err(error) = session.wallet.stop_daemon().await {
                failures.push(error.into());
            }
        }
        if let Some(process) = self.process.take() {
            if let Err(error) = process
                .terminate(self.config.chain.stop_signal, timeouts.process_exit)
                .await
            {
                failures.push(error.into());
            }
            if let Err(error) =
                wait_until_closed(&self.api_addr(), timeouts.poll_interval, timeouts.transport)
                    .await
            {
                failures.push(error.into());
            }
        }
        self.stratum = None;
        if cleanup {
            if let Err(error) = self.cleanup() {
                failures.push(error.into());
            }
        }

        if failures.is_empty() {
            info!("wallet daemon stopped");
            Ok(())
        } else {
            Err(ClientError::Teardown(failures))
        }
    }

    pub fn cleanup(&mut self) -> Result<(), ClientError> {
        let Some(dir) = self.data_dir.take() else {
            return Ok(());
        };
        remove_workdir(&dir).map_err(|source| ClientError::Io {
            action: "removing",
            path: dir,
            source,
        })
    }

    fn default_wallet_path(&self) -> Result<PathBuf, ClientError> {
        self.wallet_dir()
            .map(|dir| dir.join("wallets").join(DEFAULT_WALLET))
            .ok_or(ClientError::NotStarted)
    }

    /// Copies the default wallet file to `<data dir>/<name>`.
    pub fn backup_wallet(&self, name: &str) -> Result<PathBuf, ClientError> {
        let wallet = self.default_wallet_path()?;
        let backup = self.data_dir().ok_or(ClientError::NotStarted)?.join(name);
        fs::copy(&wallet, &backup).map_err(io_error("backing up", &wallet))?;
        Ok(backup)
    }

    /// Wipes the wallet directory, leaving an empty `wallets/` behind.
    pub fn reset_wallet_data(&self) -> Result<(), ClientError> {
        let wallet_dir = self.wallet_dir().ok_or(ClientError::NotStarted)?;
        match fs::remove_dir_all(&wallet_dir) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(io_error("removing", &wallet_dir)(error)),
        }
        let wallets = wallet_dir.join("wallets");
        fs::create_dir_all(&wallets).map_err(io_error("creating", &wallets))
    }

    /// Stops the daemon keeping its data, puts the backup `name` in place of
    /// the default wallet and starts the daemon again.
    pub async fn restore_wallet(&mut self, name: &str, scheduler: &Scheduler) -> Result<(), ClientError> {
        let endpoint = self
            .stratum
            .as_ref()
            .map(|stratum| stratum.addr().to_owned())
            .ok_or(ClientError::NotStarted)?;
        let backup = self.data_dir().ok_or(ClientError::NotStarted)?.join(name);
        let wallet = self.default_wallet_path()?;

        self.stop(false).await?;

        let (from, to) = (backup.clone(), wallet);
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&from, &to).map(|_| ())
        })
        .await?
        .map_err(io_error("restoring", &backup))?;

        self.start(&endpoint, scheduler).await
    }
}

fn heartbeat(
    wallet: Arc<Wallet>,
) -> impl FnMut() -> futures::future::BoxFuture<'static, ()> + Send + 'static {
    move || {
        let wallet = Arc::clone(&wallet);
        Box::pin(async move {
            match wallet.status().await {
                Ok(status) if status.is_running => trace!("wallet daemon heartbeat"),
                Ok(_) => warn!("wallet daemon reports it is not running"),
                Err(error) => warn!("wallet daemon heartbeat failed: {error}"),
            }
        })
    }
}

#[async_trait]
impl ManagedService for ClientStack {
    fn name(&self) -> &'static str {
        "client"
    }

    async fn stop(&mut self, cleanup: bool) -> Result<(), DynError> {
        Self::stop(self, cleanup).await.map_err(Into::into)
    }
}
