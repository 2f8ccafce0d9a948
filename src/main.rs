//! switchboard daemon

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use switchboard::HubConfig;

#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about = "Keyword-routing message hub")]
struct Cli {
    /// Path to the hub config file
    #[arg(short, long, default_value = "switchboard.toml")]
    config: PathBuf,

    /// Override the commander listen address
    #[arg(long)]
    listen: Option<String>,

    /// Log filter when RUST_LOG is unset (e.g. "info", "switchboard=debug")
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = HubConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(listen) = cli.listen {
        config.listen.commanders = listen;
    }

    switchboard::run(config).await.context("hub failed")
}
