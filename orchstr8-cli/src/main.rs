mod cmds;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use orchstr8_core::{HarnessConfig, logging};

use crate::cmds::{fixture::GenerateFixture, publish::Publish, stack::Stack};

#[derive(Parser, Debug)]
#[clap(
    name = "orchstr8",
    version,
    about = "Runs the regtest chain, index server and wallet daemon used by integration tests."
)]
struct Cli {
    #[clap(flatten)]
    common: CommonArgs,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// YAML harness configuration. Defaults to `ORCHSTR8_CONFIG` when unset.
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    /// Echo the output of every managed process.
    #[clap(short, long, global = true)]
    verbose: bool,
}

impl CommonArgs {
    fn load(&self) -> Result<HarnessConfig> {
        let config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => HarnessConfig::from_env().context("loading configuration")?,
        };
        let verbose = config.verbose || self.verbose;
        Ok(config.with_verbose(verbose))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the chain daemon and its CLI when they are missing.
    Download,
    /// Build a claim history and archive it as the test fixture.
    GenerateFixture(GenerateFixture),
    /// Run a full stack until interrupted.
    Stack(Stack),
    /// Publish streams against a running stack and report latencies.
    Publish(Publish),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.common.load()?;
    logging::init(config.verbose);

    match cli.command {
        Command::Download => cmds::binaries::download(config).await,
        Command::GenerateFixture(cmd) => cmd.run(config).await,
        Command::Stack(cmd) => cmd.run(config).await,
        Command::Publish(cmd) => cmd.run(config).await,
    }
}
