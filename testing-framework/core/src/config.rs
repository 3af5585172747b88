use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use thiserror::Error;

use crate::{adjust_timeout, process::OutputMarkers};

pub const DEFAULT_SEED_BLOCKS: u64 = 110;
pub const DEFAULT_STRATUM_PORT: u16 = 50001;
pub const DEFAULT_API_PORT: u16 = 5279;
pub const REGTEST_NETWORK: &str = "lbrycrd_regtest";

const CONFIG_PATH_ENV: &str = "ORCHSTR8_CONFIG";
const VERBOSE_ENV: &str = "ORCHSTR8_VERBOSE";
const BIN_DIR_ENV: &str = "ORCHSTR8_BIN_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Everything a stack needs to know about binaries, ports and timing.
///
/// A fresh value is built for every stack and shared by reference with each
/// component; nothing reads settings from a process-wide mutable location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub verbose: bool,
    /// Directory holding the chain daemon and its CLI, plus the index server
    /// and wallet daemon executables.
    pub bin_dir: PathBuf,
    /// Directory fixture archives are written to and read from.
    pub data_dir: PathBuf,
    /// Blocks mined before the index server starts when no hook overrides it.
    /// The wallet daemon refuses to open a session on a shorter chain.
    pub seed_blocks: u64,
    pub chain: ChainConfig,
    pub index_server: IndexServerConfig,
    pub client: ClientConfig,
    pub timeouts: Timeouts,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopSignal {
    #[default]
    Term,
    Hup,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub daemon_bin: String,
    pub cli_bin: String,
    pub release_url: String,
    pub release_asset: String,
    /// Fetch the release when the binaries are missing at start.
    pub download_missing: bool,
    pub rpc_user: String,
    pub rpc_password: String,
    pub markers: OutputMarkers,
    /// Output lines containing any of these are not echoed.
    pub ignore_output: Vec<String>,
    pub stop_signal: StopSignal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexServerConfig {
    pub bin: String,
    pub host: String,
    pub network: String,
    pub stratum_tcp_port: Option<u16>,
    pub stratum_http_port: Option<u16>,
    pub stratum_tcp_ssl_port: Option<u16>,
    pub stratum_http_ssl_port: Option<u16>,
}

#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub bin: String,
    pub api_host: String,
    pub api_port: u16,
    pub blockchain_name: String,
    pub use_upnp: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub heartbeat_interval: Duration,
}

#[serde_as]
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub process_ready: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub process_exit: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub transport: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub session: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rpc: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
}

/// A transport the index server was asked to listen on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transport {
    pub kind: &'static str,
    pub port: u16,
}

impl HarnessConfig {
    /// Loads a YAML file; missing keys fall back to the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Defaults, then `ORCHSTR8_CONFIG`, then the individual overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        if let Ok(verbose) = env::var(VERBOSE_ENV) {
            config.verbose = verbose == "1" || verbose.eq_ignore_ascii_case("true");
        }
        if let Some(bin_dir) = env::var_os(BIN_DIR_ENV) {
            config.bin_dir = PathBuf::from(bin_dir);
        }
        Ok(config)
    }

    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn with_bin_dir(mut self, bin_dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = bin_dir.into();
        self
    }

    #[must_use]
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    #[must_use]
    pub fn chain_daemon_path(&self) -> PathBuf {
        self.bin_dir.join(&self.chain.daemon_bin)
    }

    #[must_use]
    pub fn chain_cli_path(&self) -> PathBuf {
        self.bin_dir.join(&self.chain.cli_bin)
    }

    #[must_use]
    pub fn index_server_path(&self) -> PathBuf {
        self.bin_dir.join(&self.index_server.bin)
    }

    #[must_use]
    pub fn client_path(&self) -> PathBuf {
        self.bin_dir.join(&self.client.bin)
    }
}

impl IndexServerConfig {
    #[must_use]
    pub fn enabled_transports(&self) -> Vec<Transport> {
        [
            ("stratum_tcp", self.stratum_tcp_port),
            ("stratum_http", self.stratum_http_port),
            ("stratum_tcp_ssl", self.stratum_tcp_ssl_port),
            ("stratum_http_ssl", self.stratum_http_ssl_port),
        ]
        .into_iter()
        .filter_map(|(kind, port)| port.map(|port| Transport { kind, port }))
        .collect()
    }
}

impl Timeouts {
    /// The same budgets, stretched for slow CI machines.
    #[must_use]
    pub fn adjusted(self) -> Self {
        Self {
            process_ready: adjust_timeout(self.process_ready),
            process_exit: adjust_timeout(self.process_exit),
            transport: adjust_timeout(self.transport),
            session: adjust_timeout(self.session),
            rpc: adjust_timeout(self.rpc),
            poll_interval: self.poll_interval,
        }
    }
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let root = workspace_root();
        Self {
            verbose: false,
            bin_dir: root.join("bin"),
            data_dir: root.join("data"),
            seed_blocks: DEFAULT_SEED_BLOCKS,
            chain: ChainConfig::default(),
            index_server: IndexServerConfig::default(),
            client: ClientConfig::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            daemon_bin: "lbrycrdd".to_owned(),
            cli_bin: "lbrycrd-cli".to_owned(),
            release_url: "https://api.github.com/repos/lbryio/lbrycrd/releases/latest".to_owned(),
            release_asset: "lbrycrd-linux.zip".to_owned(),
            download_missing: true,
            rpc_user: "rpcuser".to_owned(),
            rpc_password: "rpcpassword".to_owned(),
            markers: OutputMarkers::default(),
            ignore_output: vec![
                "keypool keep".to_owned(),
                "keypool reserve".to_owned(),
                "keypool return".to_owned(),
            ],
            stop_signal: StopSignal::Term,
        }
    }
}

impl Default for IndexServerConfig {
    fn default() -> Self {
        Self {
            bin: "lbryum-server".to_owned(),
            host: "localhost".to_owned(),
            network: REGTEST_NETWORK.to_owned(),
            stratum_tcp_port: Some(DEFAULT_STRATUM_PORT),
            stratum_http_port: None,
            stratum_tcp_ssl_port: None,
            stratum_http_ssl_port: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bin: "lbrynet-daemon".to_owned(),
            api_host: "localhost".to_owned(),
            api_port: DEFAULT_API_PORT,
            blockchain_name: REGTEST_NETWORK.to_owned(),
            use_upnp: false,
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            process_ready: Duration::from_secs(60),
            process_exit: Duration::from_secs(30),
            transport: Duration::from_secs(60),
            session: Duration::from_secs(120),
            rpc: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}
