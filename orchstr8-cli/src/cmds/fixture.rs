use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Args;
use orchstr8_core::{Fixture, FixtureConfig, HarnessConfig, fixture::FixtureError};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct GenerateFixture {
    /// Blocks of claims to generate.
    #[clap(long, default_value_t = 10)]
    pub blocks: u64,
    /// Claims per block.
    #[clap(long, default_value_t = 10)]
    pub txns: u64,
    #[clap(long, default_value_t = 2015)]
    pub seed: u64,
    /// Blocks mined before the first claim.
    #[clap(long, default_value_t = 110)]
    pub start_blocks: u64,
}

impl GenerateFixture {
    pub async fn run(self, config: HarnessConfig) -> Result<()> {
        let mut fixture = Fixture::new(
            FixtureConfig {
                blocks: self.blocks,
                txns_per_block: self.txns,
                seed: self.seed,
                start_blocks: self.start_blocks,
            },
            Arc::new(config),
        );

        let generated = generate(&mut fixture).await;
        if generated.is_err() {
            if let Err(error) = fixture.stop().await {
                warn!("stopping the chain: {error}");
            }
        }
        let cleaned = fixture.cleanup();
        generated.context("generating fixture")?;
        cleaned.context("removing the chain directory")?;

        println!("{}", fixture.archive_path().display());
        Ok(())
    }
}

async fn generate(fixture: &mut Fixture) -> Result<(), FixtureError> {
    fixture.start().await?;
    fixture.generate_transactions().await?;
    fixture.stop().await?;
    fixture.save().await?;
    info!(archive = %fixture.archive_path().display(), "fixture generated");
    Ok(())
}
