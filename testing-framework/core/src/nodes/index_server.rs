use std::{
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::{net::TcpStream, time::timeout};
use tracing::{info, warn};

use super::{
    ManagedService, create_workdir, remove_workdir, stop_outcome,
    stratum::{StratumClient, StratumError},
    wait_until_closed,
};
use crate::{
    DynError, HarnessConfig,
    config::Transport,
    poll::{PollError, wait_for},
    process::{NoMarkers, OutputFilter, ProcessError, ProcessHandle, ProcessSpec},
};

const CONF_FILE: &str = "lbryum.conf";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index server has not been started")]
    NotStarted,
    #[error("index server must listen on exactly one transport, {count} configured")]
    TransportCount { count: usize },
    #[error("{0} is already accepting connections")]
    PortInUse(String),
    #[error("chain data directory {0} does not exist")]
    ChainDirMissing(PathBuf),
    #[error("index server failed to start: {reason}")]
    StartupFailed { reason: String },
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Stratum(#[from] StratumError),
}

/// The stratum index server, reading blocks from a chain node's data dir.
pub struct IndexServer {
    config: Arc<HarnessConfig>,
    data_dir: Option<PathBuf>,
    process: Option<ProcessHandle>,
    transport: Option<Transport>,
}

impl IndexServer {
    #[must_use]
    pub const fn new(config: Arc<HarnessConfig>) -> Self {
        Self {
            config,
            data_dir: None,
            process: None,
            transport: None,
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process
            .as_ref()
            .is_some_and(|process| !process.has_exited())
    }

    /// `host:port` of the stratum transport.
    #[must_use]
    pub fn endpoint(&self) -> String {
        let port = self
            .transport
            .or_else(|| self.config.index_server.enabled_transports().first().copied())
            .map_or(0, |transport| transport.port);
        format!("{}:{port}", self.config.index_server.host)
    }

    fn single_transport(&self) -> Result<Transport, IndexError> {
        match self.config.index_server.enabled_transports().as_slice() {
            [transport] => Ok(*transport),
            transports => Err(IndexError::TransportCount {
                count: transports.len(),
            }),
        }
    }

    #[must_use]
    pub fn render_conf(&self, dir: &Path) -> String {
        let server = &self.config.index_server;
        let port = |port: Option<u16>| port.map(|port| port.to_string()).unwrap_or_default();
        let mut conf = String::new();
        let _ = write!(
            conf,
            "[network]\ntype={}\n[server]\nlogfile={}\nstratum_tcp_port={}\nstratum_http_port={}\nstratum_tcp_ssl_port={}\nstratum_http_ssl_port={}\n[leveldb]\npath={}\n",
            server.network,
            dir.join("lbryum.log").display(),
            port(server.stratum_tcp_port),
            port(server.stratum_http_port),
            port(server.stratum_tcp_ssl_port),
            port(server.stratum_http_ssl_port),
            dir.join("lbryum_db").display(),
        );
        conf
    }

    /// Writes `lbryum.conf`, launches the server against `chain_data_dir` and
    /// waits until its transport accepts connections. The port must be free
    /// beforehand.
    pub async fn start(&mut self, chain_data_dir: &Path) -> Result<(), IndexError> {
        if self.is_running() {
            return Ok(());
        }
        let transport = self.single_transport()?;
        if !chain_data_dir.is_dir() {
            return Err(IndexError::ChainDirMissing(chain_data_dir.to_owned()));
        }
        let timeouts = self.config.timeouts;
        let addr = format!("{}:{}", self.config.index_server.host, transport.port);
        if matches!(
            timeout(timeouts.rpc, TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        ) {
            return Err(IndexError::PortInUse(addr));
        }

        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => {
                let dir = create_workdir("lbryum-").map_err(|source| IndexError::Io {
                    action: "creating",
                    path: std::env::temp_dir(),
                    source,
                })?;
                self.data_dir = Some(dir.clone());
                dir
            }
        };
        let conf = dir.join(CONF_FILE);
        fs::write(&conf, self.render_conf(&dir)).map_err(|source| IndexError::Io {
            action: "writing",
            path: conf.clone(),
            source,
        })?;

        let spec = ProcessSpec::new("lbryum-server", self.config.index_server_path())
            .args([
                "--conf".to_owned(),
                conf.display().to_string(),
                "--lbrycrdd-dir".to_owned(),
                chain_data_dir.display().to_string(),
            ])
            .current_dir(&dir);
        let process = ProcessHandle::launch(
            &spec,
            Arc::new(NoMarkers),
            OutputFilter::new(self.config.verbose, Vec::new()),
        )?;

        let listening = wait_for(
            &format!("{} transport on {addr}", transport.kind),
            timeouts.poll_interval,
            timeouts.transport,
            || async {
                if process.has_exited() {
                    return Ok(Some(false));
                }
                TcpStream::connect(&addr).await.map(|_| Some(true))
            },
        )
        .await;

        let reason = match listening {
            Ok(true) => {
                info!(endpoint = addr, "index server started");
                self.process = Some(process);
                self.transport = Some(transport);
                return Ok(());
            }
            Ok(false) => "process exited before listening".to_owned(),
            Err(error) => error.to_string(),
        };
        if let Err(error) = process
            .terminate(self.config.chain.stop_signal, timeouts.process_exit)
            .await
        {
            warn!("stopping failed index server: {error}");
        }
        Err(IndexError::StartupFailed { reason })
    }

    /// Stops the server and waits until its port is released.
    pub async fn stop(&mut self, cleanup: bool) -> Result<(), IndexError> {
        let stopped = self.shutdown_process().await;
        let cleaned = if cleanup { self.cleanup() } else { Ok(()) };
        stop_outcome(stopped, cleaned)
    }

    async fn shutdown_process(&mut self) -> Result<(), IndexError> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };
        let timeouts = self.config.timeouts;
        process
            .terminate(self.config.chain.stop_signal, timeouts.process_exit)
            .await?;
        if let Some(transport) = self.transport.take() {
            let addr = format!("{}:{}", self.config.index_server.host, transport.port);
            wait_until_closed(&addr, timeouts.poll_interval, timeouts.transport).await?;
        }
        info!("index server stopped");
        Ok(())
    }

    pub fn cleanup(&mut self) -> Result<(), IndexError> {
        let Some(dir) = self.data_dir.take() else {
            return Ok(());
        };
        remove_workdir(&dir).map_err(|source| IndexError::Io {
            action: "removing",
            path: dir,
            source,
        })
    }

    pub fn stratum_client(&self) -> Result<StratumClient, IndexError> {
        let transport = self.transport.ok_or(IndexError::NotStarted)?;
        Ok(StratumClient::new(
            &self.config.index_server.host,
            transport.port,
            self.config.timeouts.rpc,
        ))
    }

    pub async fn stratum_command(&self, method: &str, params: &[Value]) -> Result<Value, IndexError> {
        Ok(self.stratum_client()?.call(method, params).await?)
    }
}

#[async_trait]
impl ManagedService for IndexServer {
    fn name(&self) -> &'static str {
        "index server"
    }

    async fn stop(&mut self, cleanup: bool) -> Result<(), DynError> {
        Self::stop(self, cleanup).await.map_err(Into::into)
    }
}
