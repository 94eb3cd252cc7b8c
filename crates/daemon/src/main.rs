// gitbrokerd: storage daemon entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gitbroker_daemon::config::{BrokerConfig, DEFAULT_CONFIG_FILE};

#[derive(Debug, Parser)]
#[command(name = "gitbrokerd", version, about = "Git-backed service broker storage daemon")]
struct Cli {
    /// TOML configuration file. Missing file means defaults.
    #[arg(long, short, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        BrokerConfig::load_from(&cli.config)
            .with_context(|| format!("failed to load {}", cli.config.display()))?
    } else {
        info!(path = %cli.config.display(), "config file not found; using defaults");
        BrokerConfig::default()
    };
    config.apply_process_env();

    info!("starting git service broker daemon");
    gitbroker_daemon::runtime::run(config).await.context("daemon terminated unexpectedly")
}
