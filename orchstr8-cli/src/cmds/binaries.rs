use std::sync::Arc;

use anyhow::{Context as _, Result};
use orchstr8_core::{ChainNode, HarnessConfig};
use tracing::info;

pub async fn download(config: HarnessConfig) -> Result<()> {
    let chain = ChainNode::new(Arc::new(config));
    let downloaded = chain
        .ensure()
        .await
        .context("downloading chain binaries")?;
    if downloaded {
        info!(path = %chain.daemon_path().display(), "chain binaries downloaded");
    } else {
        info!(path = %chain.daemon_path().display(), "chain binaries already present");
    }
    Ok(())
}
