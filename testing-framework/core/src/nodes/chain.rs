use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info, warn};

use super::{
    ManagedService,
    binaries::{self, BinariesError},
    create_workdir, remove_workdir, stop_outcome,
};
use crate::{
    Amount, DynError, HarnessConfig,
    process::{OutputFilter, ProcessError, ProcessHandle, ProcessSpec},
};

const CONF_FILE: &str = "lbrycrd.conf";

/// Captured result of one CLI invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl CliOutput {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == Some(0) && self.stderr.trim().is_empty()
    }

    /// The last 64-character hex token in stdout, if any.
    #[must_use]
    pub fn txid(&self) -> Option<&str> {
        self.stdout
            .split(|c: char| !c.is_ascii_hexdigit())
            .filter(|token| token.len() == 64)
            .last()
    }
}

impl fmt::Display for CliOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            write!(f, "{}", self.stdout.trim())
        } else {
            write!(f, "{stderr}")
        }
    }
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain node has not been set up")]
    NotSetUp,
    #[error("chain node has not been started")]
    NotStarted,
    #[error("chain daemon failed to start: {reason}")]
    StartupFailed { reason: String },
    #[error("`{command}` failed with exit code {code:?}: {output}")]
    Cli {
        command: String,
        output: CliOutput,
        code: Option<i32>,
    },
    #[error("`{command}` did not complete in time")]
    CliTimeout { command: String },
    #[error("`{command}` returned malformed JSON: {source}")]
    Json {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("asked for {requested} blocks, chain produced {produced}")]
    UnexpectedBlockCount { requested: u64, produced: usize },
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
    Binaries(#[from] BinariesError),
}

/// A regtest chain daemon plus the CLI used to query it.
pub struct ChainNode {
    config: Arc<HarnessConfig>,
    data_dir: Option<PathBuf>,
    process: Option<ProcessHandle>,
}

impl ChainNode {
    #[must_use]
    pub const fn new(config: Arc<HarnessConfig>) -> Self {
        Self {
            config,
            data_dir: None,
            process: None,
        }
    }

    #[must_use]
    pub fn daemon_path(&self) -> PathBuf {
        self.config.chain_daemon_path()
    }

    #[must_use]
    pub fn cli_path(&self) -> PathBuf {
        self.config.chain_cli_path()
    }

    /// Whether both the daemon and its CLI are present.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.daemon_path().is_file() && self.cli_path().is_file()
    }

    /// Downloads the binaries when missing. Returns whether a download happened.
    pub async fn ensure(&self) -> Result<bool, ChainError> {
        if self.exists() {
            return Ok(false);
        }
        binaries::download_chain(&self.config.chain, &self.config.bin_dir).await?;
        Ok(true)
    }

    pub fn data_dir(&self) -> Result<&Path, ChainError> {
        self.data_dir.as_deref().ok_or(ChainError::NotSetUp)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process
            .as_ref()
            .is_some_and(|process| !process.has_exited())
    }

    /// Creates the working directory and writes `lbrycrd.conf`.
    pub fn setup(&mut self) -> Result<(), ChainError> {
        let dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => {
                let dir = create_workdir("lbrycrd-").map_err(|source| ChainError::Io {
                    action: "creating",
                    path: std::env::temp_dir(),
                    source,
                })?;
                self.data_dir = Some(dir.clone());
                dir
            }
        };
        let conf = dir.join(CONF_FILE);
        let contents = format!(
            "rpcuser={}\nrpcpassword={}\n",
            self.config.chain.rpc_user, self.config.chain.rpc_password
        );
        fs::write(&conf, contents).map_err(|source| ChainError::Io {
            action: "writing",
            path: conf,
            source,
        })
    }

    /// Launches the daemon and waits for it to finish loading, downloading
    /// the binaries first when they are missing and downloads are enabled.
    pub async fn start(&mut self) -> Result<(), ChainError> {
        if self.is_running() {
            return Ok(());
        }
        let dir = self.data_dir()?.to_owned();
        if self.config.chain.download_missing {
            self.ensure().await?;
        }
        let spec = ProcessSpec::new("lbrycrdd", self.daemon_path())
            .arg(format!("-datadir={}", dir.display()))
            .args(["-printtoconsole", "-regtest", "-server", "-txindex"])
            .current_dir(&dir);
        let chain = &self.config.chain;
        let process = ProcessHandle::launch(
            &spec,
            Arc::new(chain.markers.clone()),
            OutputFilter::new(self.config.verbose, chain.ignore_output.clone()),
        )?;

        let reason = match process
            .wait_ready_timeout(self.config.timeouts.process_ready)
            .await
        {
            Ok(true) => {
                info!(data_dir = %dir.display(), "chain daemon ready");
                self.process = Some(process);
                return Ok(());
            }
            Ok(false) => "daemon reported an error or exited".to_owned(),
            Err(error) => error.to_string(),
        };
        if let Err(error) = process
            .terminate(chain.stop_signal, self.config.timeouts.process_exit)
            .await
        {
            warn!("stopping failed chain daemon: {error}");
        }
        Err(ChainError::StartupFailed { reason })
    }

    /// Stops the daemon, removing the working directory when `cleanup`.
    pub async fn stop(&mut self, cleanup: bool) -> Result<(), ChainError> {
        let stopped = match self.process.take() {
            Some(process) => process
                .terminate(
                    self.config.chain.stop_signal,
                    self.config.timeouts.process_exit,
                )
                .await
                .map_err(ChainError::from),
            None => Ok(()),
        };
        let cleaned = if cleanup { self.cleanup() } else { Ok(()) };
        stop_outcome(stopped, cleaned)
    }

    pub fn cleanup(&mut self) -> Result<(), ChainError> {
        let Some(dir) = self.data_dir.take() else {
            return Ok(());
        };
        remove_workdir(&dir).map_err(|source| ChainError::Io {
            action: "removing",
            path: dir,
            source,
        })
    }

    /// Runs the CLI and captures its output without judging it.
    pub async fn cli(&self, args: &[&str]) -> Result<CliOutput, ChainError> {
        if !self.is_running() {
            return Err(ChainError::NotStarted);
        }
        let dir = self.data_dir()?;
        let command = args.join(" ");
        debug!(command, "lbrycrd-cli");

        let run = Command::new(self.cli_path())
            .arg(format!("-datadir={}", dir.display()))
            .arg("-regtest")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = timeout(self.config.timeouts.rpc, run)
            .await
            .map_err(|_| ChainError::CliTimeout {
                command: command.clone(),
            })?
            .map_err(|source| ChainError::Io {
                action: "running",
                path: self.cli_path(),
                source,
            })?;

        Ok(CliOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }

    /// Runs the CLI and returns trimmed stdout, failing on stderr or a
    /// non-zero exit.
    pub async fn query(&self, args: &[&str]) -> Result<String, ChainError> {
        let output = self.cli(args).await?;
        if !output.is_success() {
            let code = output.code;
            return Err(ChainError::Cli {
                command: args.join(" "),
                output,
                code,
            });
        }
        Ok(output.stdout.trim().to_owned())
    }

    pub async fn query_json(&self, args: &[&str]) -> Result<Value, ChainError> {
        let stdout = self.query(args).await?;
        serde_json::from_str(&stdout).map_err(|source| ChainError::Json {
            command: args.join(" "),
            source,
        })
    }

    /// Mines `blocks` blocks and returns their hashes.
    pub async fn generate(&self, blocks: u64) -> Result<Vec<String>, ChainError> {
        let count = blocks.to_string();
        let args = ["generate", count.as_str()];
        let value = self.query_json(&args).await?;
        let hashes: Vec<String> =
            serde_json::from_value(value).map_err(|source| ChainError::Json {
                command: args.join(" "),
                source,
            })?;
        if hashes.len() as u64 != blocks {
            return Err(ChainError::UnexpectedBlockCount {
                requested: blocks,
                produced: hashes.len(),
            });
        }
        Ok(hashes)
    }

    pub async fn block_count(&self) -> Result<u64, ChainError> {
        let value = self.query_json(&["getblockcount"]).await?;
        value.as_u64().ok_or_else(|| ChainError::Cli {
            command: "getblockcount".to_owned(),
            output: CliOutput {
                stdout: value.to_string(),
                ..CliOutput::default()
            },
            code: Some(0),
        })
    }

    pub async fn send_to_address(&self, address: &str, amount: Amount) -> Result<String, ChainError> {
        let amount = amount.to_string();
        self.query(&["sendtoaddress", address, &amount]).await
    }

    /// Submits a claim. The CLI mixes status text with the id, so the raw
    /// output is returned; see [`CliOutput::txid`].
    pub async fn claim_name(
        &self,
        name: &str,
        value: &str,
        amount: Amount,
    ) -> Result<CliOutput, ChainError> {
        let amount = amount.to_string();
        self.cli(&["claimname", name, value, &amount]).await
    }

    pub async fn support_claim(
        &self,
        name: &str,
        claim_id: &str,
        amount: Amount,
    ) -> Result<String, ChainError> {
        let amount = amount.to_string();
        self.query(&["supportclaim", name, claim_id, &amount]).await
    }

    pub async fn abandon_claim(
        &self,
        txid: &str,
        address: &str,
        amount: Amount,
    ) -> Result<String, ChainError> {
        let amount = amount.to_string();
        self.query(&["abandonclaim", txid, address, &amount]).await
    }

    pub async fn decode_raw_transaction(&self, raw: &str) -> Result<Value, ChainError> {
        self.query_json(&["decoderawtransaction", raw]).await
    }

    /// Verbose form (`getrawtransaction <txid> 1`).
    pub async fn get_raw_transaction(&self, txid: &str) -> Result<Value, ChainError> {
        self.query_json(&["getrawtransaction", txid, "1"]).await
    }

    pub async fn validate_address(&self, address: &str) -> Result<Value, ChainError> {
        self.query_json(&["validateaddress", address]).await
    }

    pub async fn get_name_proof(
        &self,
        name: &str,
        block_hash: Option<&str>,
    ) -> Result<Value, ChainError> {
        match block_hash {
            Some(hash) => self.query_json(&["getnameproof", name, hash]).await,
            None => self.query_json(&["getnameproof", name]).await,
        }
    }

    pub async fn get_claims_for_name(&self, name: &str) -> Result<Value, ChainError> {
        self.query_json(&["getclaimsforname", name]).await
    }

    pub async fn get_claims_for_tx(&self, txid: &str) -> Result<Value, ChainError> {
        self.query_json(&["getclaimsfortx", txid]).await
    }
}

#[async_trait]
impl ManagedService for ChainNode {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn stop(&mut self, cleanup: bool) -> Result<(), DynError> {
        Self::stop(self, cleanup).await.map_err(Into::into)
    }
}
