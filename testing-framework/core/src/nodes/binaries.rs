use std::{
    fs, io,
    os::unix::fs::PermissionsExt as _,
    path::{Path, PathBuf},
};

use reqwest::header::USER_AGENT;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::{
    archive::{self, ArchiveError},
    config::ChainConfig,
};

const AGENT: &str = concat!("orchstr8/", env!("CARGO_PKG_VERSION"));
const EXECUTABLE: u32 = 0o755;

#[derive(Debug, Error)]
pub enum BinariesError {
    #[error("requesting {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("release at {url} has no asset named {asset}")]
    MissingAsset { url: String, asset: String },
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("release archive did not contain {0}")]
    NotInArchive(PathBuf),
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

fn find_asset<'a>(release: &'a Release, asset: &str) -> Option<&'a str> {
    release
        .assets
        .iter()
        .find(|candidate| candidate.name == asset)
        .map(|candidate| candidate.browser_download_url.as_str())
}

async fn get(client: &reqwest::Client, url: &str) -> Result<reqwest::Response, BinariesError> {
    client
        .get(url)
        .header(USER_AGENT, AGENT)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|source| BinariesError::Http {
            url: url.to_owned(),
            source,
        })
}

/// Downloads the latest chain release into `bin_dir` and marks the daemon and
/// its CLI executable.
pub async fn download_chain(config: &ChainConfig, bin_dir: &Path) -> Result<(), BinariesError> {
    let client = reqwest::Client::new();
    let http_error = |url: &str| {
        let url = url.to_owned();
        move |source| BinariesError::Http { url, source }
    };

    let release: Release = get(&client, &config.release_url)
        .await?
        .json()
        .await
        .map_err(http_error(&config.release_url))?;
    let download_url = find_asset(&release, &config.release_asset)
        .ok_or_else(|| BinariesError::MissingAsset {
            url: config.release_url.clone(),
            asset: config.release_asset.clone(),
        })?
        .to_owned();

    info!(url = download_url, "downloading chain binaries");
    let bytes = get(&client, &download_url)
        .await?
        .bytes()
        .await
        .map_err(http_error(&download_url))?;

    fs::create_dir_all(bin_dir).map_err(|source| BinariesError::Io {
        action: "creating",
        path: bin_dir.to_owned(),
        source,
    })?;
    let zip_path = bin_dir.join(&config.release_asset);
    fs::write(&zip_path, &bytes).map_err(|source| BinariesError::Io {
        action: "writing",
        path: zip_path.clone(),
        source,
    })?;

    let target = bin_dir.to_owned();
    let archive_path = zip_path.clone();
    tokio::task::spawn_blocking(move || archive::extract(&archive_path, &target)).await??;
    fs::remove_file(&zip_path).map_err(|source| BinariesError::Io {
        action: "removing",
        path: zip_path,
        source,
    })?;

    for name in [&config.daemon_bin, &config.cli_bin] {
        make_executable(&bin_dir.join(name))?;
    }
    info!(bin_dir = %bin_dir.display(), "chain binaries ready");
    Ok(())
}

fn make_executable(path: &Path) -> Result<(), BinariesError> {
    if !path.is_file() {
        return Err(BinariesError::NotInArchive(path.to_owned()));
    }
    fs::set_permissions(path, fs::Permissions::from_mode(EXECUTABLE)).map_err(|source| {
        BinariesError::Io {
            action: "marking executable",
            path: path.to_owned(),
            source,
        }
    })
}
