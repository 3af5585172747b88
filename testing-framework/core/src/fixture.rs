use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use rand::{Rng as _, RngCore as _, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::{
    Amount, HarnessConfig,
    archive::{self, ArchiveError},
    nodes::chain::{ChainError, ChainNode, CliOutput},
};

const ARCHIVE_NAME: &str = "blockchain.zip";
const SOURCE_HASH_LEN: usize = 48;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("claiming {name} returned no transaction id: {output}")]
    Claim { name: String, output: CliOutput },
    #[error("archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixtureConfig {
    pub blocks: u64,
    pub txns_per_block: u64,
    pub seed: u64,
    /// Blocks mined before the first claim.
    pub start_blocks: u64,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            blocks: 100,
            txns_per_block: 100,
            seed: 2015,
            start_blocks: 110,
        }
    }
}

/// One claim the generator submits: name, hex-encoded claim document and bid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedClaim {
    pub name: String,
    pub value: String,
    pub amount: Amount,
}

/// Builds a reproducible claim history on a fresh chain and archives it.
pub struct Fixture {
    config: FixtureConfig,
    archive: PathBuf,
    chain: ChainNode,
    rng: ChaCha8Rng,
}

impl Fixture {
    #[must_use]
    pub fn new(config: FixtureConfig, harness: Arc<HarnessConfig>) -> Self {
        Self {
            config,
            archive: archive_path(&harness),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            chain: ChainNode::new(harness),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &FixtureConfig {
        &self.config
    }

    #[must_use]
    pub const fn chain(&self) -> &ChainNode {
        &self.chain
    }

    #[must_use]
    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    /// Draws the claims for block `block` from the generator.
    ///
    /// Each call advances the generator, so the sequence of plans is what
    /// equal seeds reproduce.
    pub fn plan_block(&mut self, block: u64) -> Vec<GeneratedClaim> {
        (0..self.config.txns_per_block)
            .map(|txn| {
                let amount = Amount::from_millis(self.rng.gen_range(1..5));
                let mut source = [0_u8; SOURCE_HASH_LEN];
                self.rng.fill_bytes(&mut source);
                GeneratedClaim {
                    name: format!("@block{block}txn{txn}"),
                    value: claim_document(&source),
                    amount,
                }
            })
            .collect()
    }

    pub async fn start(&mut self) -> Result<(), FixtureError> {
        self.chain.setup()?;
        self.chain.start().await?;
        self.chain.generate(self.config.start_blocks).await?;
        Ok(())
    }

    /// Claims `txns_per_block` names per block, mining one block after each
    /// batch.
    pub async fn generate_transactions(&mut self) -> Result<(), FixtureError> {
        for block in 0..self.config.blocks {
            for claim in self.plan_block(block) {
                let output = self
                    .chain
                    .claim_name(&claim.name, &claim.value, claim.amount)
                    .await?;
                if output.txid().is_none() {
                    return Err(FixtureError::Claim {
                        name: claim.name,
                        output,
                    });
                }
            }
            self.chain.generate(1).await?;
            info!(block, of = self.config.blocks, "fixture block generated");
        }
        Ok(())
    }

    /// Stops the chain, keeping its directory for [`Self::save`].
    pub async fn stop(&mut self) -> Result<(), FixtureError> {
        Ok(self.chain.stop(false).await?)
    }

    /// Archives the chain directory, replacing any previous archive.
    pub async fn save(&self) -> Result<(), FixtureError> {
        let source = self.chain.data_dir()?.to_owned();
        let target = self.archive.clone();
        tokio::task::spawn_blocking(move || archive::zip_dir(&source, &target)).await??;
        info!(archive = %self.archive.display(), "fixture saved");
        Ok(())
    }

    /// Unpacks the archive into this fixture's chain directory.
    pub async fn extract(&mut self) -> Result<(), FixtureError> {
        if self.chain.data_dir().is_err() {
            self.chain.setup()?;
        }
        extract_into(&self.archive, &self.chain).await
    }

    pub fn cleanup(&mut self) -> Result<(), FixtureError> {
        Ok(self.chain.cleanup()?)
    }
}

/// Where fixtures are archived for `config`.
#[must_use]
pub fn archive_path(config: &HarnessConfig) -> PathBuf {
    config.data_dir.join(ARCHIVE_NAME)
}

/// Unpacks `archive` into the working directory of a set-up `chain`.
pub async fn extract_into(archive: &Path, chain: &ChainNode) -> Result<(), FixtureError> {
    let target = chain.data_dir()?.to_owned();
    let source = archive.to_owned();
    tokio::task::spawn_blocking(move || archive::extract(&source, &target)).await??;
    info!(archive = %archive.display(), "fixture extracted");
    Ok(())
}

fn claim_document(source_hash: &[u8]) -> String {
    let document = json!({
        "version": "_0_0_1",
        "claimType": "streamType",
        "stream": {
            "source": {
                "source": hex::encode(source_hash),
                "version": "_0_0_1",
                "contentType": "video/mp4",
                "sourceType": "lbry_sd_hash",
            },
            "version": "_0_0_1",
            "metadata": {
                "license": "LBRY Inc",
                "description": "What is LBRY? An introduction with Alex Tabarrok",
                "language": "en",
                "title": "What is LBRY?",
                "author": "Samuel Bryan",
                "version": "_0_1_0",
                "nsfw": false,
                "licenseUrl": "",
                "preview": "",
                "thumbnail": "https://s3.amazonaws.com/files.lbry.io/logo.png",
            },
        },
    });
    hex::encode(document.to_string())
}
