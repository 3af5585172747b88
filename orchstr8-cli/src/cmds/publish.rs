use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context as _, Result};
use clap::Args;
use orchstr8_core::{
    Amount, DynError, HarnessConfig, ServiceStack, StartupHooks, nodes::client::wallet::PublishRequest,
};
use rand::{Rng as _, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::info;

use super::{log_report, stack::print_data_dirs};

/// Blocks mined before the index server starts; enough for the wallet to
/// hold spendable coinbase outputs.
const SEED_BLOCKS: u64 = 1010;
const FUNDING: Amount = Amount::from_credits(100);
const PUBLISH_FILE: &str = "the_file";

#[derive(Args, Debug)]
pub struct Publish {
    #[clap(long, default_value_t = 5)]
    pub blocks: u64,
    /// Publishes per block.
    #[clap(long, default_value_t = 10)]
    pub txns: u64,
    #[clap(long, default_value_t = 2015)]
    pub seed: u64,
}

impl Publish {
    pub async fn run(self, config: HarnessConfig) -> Result<()> {
        let mut stack = ServiceStack::new(Arc::new(config));
        let hooks = StartupHooks::default().after_chain_start(|chain| {
            Box::pin(async move {
                chain.generate(SEED_BLOCKS).await?;
                Ok::<_, DynError>(())
            })
        });

        let outcome = match stack.startup(hooks).await {
            Ok(()) => self.publish(&stack).await,
            Err(error) => Err(error).context("starting the stack"),
        };
        log_report(&stack.shutdown(false).await);
        print_data_dirs(&stack);
        let stats = outcome?;
        info!(
            count = stats.count(),
            min = ?stats.min(),
            mean = ?stats.mean(),
            max = ?stats.max(),
            "publish latency"
        );
        Ok(())
    }

    async fn publish(&self, stack: &ServiceStack) -> Result<LatencyStats> {
        let chain = stack.chain();
        let client = stack.client();
        let wallet = client.wallet()?;

        let address = wallet.least_used_address().await?;
        let txid = chain.send_to_address(&address, FUNDING).await?;
        chain.generate(1).await?;
        wallet.wait_for_tx_in_wallet(&txid).await?;
        wallet.wait_for_balance(FUNDING).await?;

        let file = client
            .download_dir()
            .context("client has no data directory")?
            .join(PUBLISH_FILE);
        tokio::fs::write(&file, "message that will be heard around the world\n")
            .await
            .with_context(|| format!("writing {}", file.display()))?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut stats = LatencyStats::default();
        for block in 0..self.blocks {
            for txn in 0..self.txns {
                let name = format!("block{block}txn{txn}");
                let request = PublishRequest {
                    name: &name,
                    bid: Amount::from_millis(rng.gen_range(1..5)),
                    file_path: &file,
                    metadata: json!({
                        "description": "Some interesting content",
                        "title": "My interesting content",
                        "author": "Video shot by me@example.com",
                        "language": "en",
                        "license": "LBRY Inc",
                        "nsfw": false,
                    }),
                };
                let started = Instant::now();
                wallet
                    .publish(&request)
                    .await
                    .with_context(|| format!("publishing {name}"))?;
                stats.record(started.elapsed());
            }
            chain.generate(1).await?;
            info!(block, mean = ?stats.mean(), "published block");
        }
        Ok(stats)
    }
}

#[derive(Debug, Default)]
struct LatencyStats {
    samples: Vec<Duration>,
}

impl LatencyStats {
    fn record(&mut self, sample: Duration) {
        self.samples.push(sample);
    }

    fn count(&self) -> usize {
        self.samples.len()
    }

    fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    fn mean(&self) -> Option<Duration> {
        let count = u32::try_from(self.samples.len()).ok().filter(|count| *count > 0)?;
        Some(self.samples.iter().sum::<Duration>() / count)
    }
}
