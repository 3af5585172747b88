use std::{path::Path, sync::Arc};

use anyhow::{Context as _, Result};
use clap::Args;
use orchstr8_core::{HarnessConfig, ServiceStack, StartupHooks};
use tracing::info;

use super::log_report;

#[derive(Args, Debug)]
pub struct Stack {
    /// Blocks mined before the index server starts.
    #[clap(long, default_value_t = 110)]
    pub seed_blocks: u64,
    /// Keep the working directories after shutdown.
    #[clap(long)]
    pub keep: bool,
}

impl Stack {
    pub async fn run(self, mut config: HarnessConfig) -> Result<()> {
        config.seed_blocks = self.seed_blocks;
        let mut stack = ServiceStack::new(Arc::new(config));

        if let Err(error) = stack.startup(StartupHooks::default()).await {
            log_report(&stack.shutdown(!self.keep).await);
            return Err(error).context("starting the stack");
        }
        print_data_dirs(&stack);

        info!("stack running, press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;

        let report = stack.shutdown(!self.keep).await;
        log_report(&report);
        if self.keep {
            print_data_dirs(&stack);
        }
        Ok(())
    }
}

pub fn print_data_dirs(stack: &ServiceStack) {
    let show = |dir: Option<&Path>| dir.map_or_else(|| "-".to_owned(), |dir| dir.display().to_string());
    println!("lbrycrd: {}", show(stack.chain().data_dir().ok()));
    println!("lbrynet: {}", show(stack.client().data_dir()));
    println!("lbryumserver: {}", show(stack.index().data_dir()));
}
