//! Probe entry point.

use anyhow::Context;
use clap::Parser;
use legator_probe::{ProbeAgent, ProbeConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "legator-probe", version, about = "Legator host probe")]
struct Args {
    /// Control-plane base URL, required for first-run registration.
    #[arg(long, env = "LEGATOR_SERVER_URL")]
    server_url: Option<String>,

    /// One-time registration token.
    #[arg(long, env = "LEGATOR_REGISTER_TOKEN")]
    token: Option<String>,

    /// Tags to register with, comma-separated.
    #[arg(long, env = "LEGATOR_TAGS", value_delimiter = ',')]
    tags: Vec<String>,

    /// Path of the persisted probe config.
    #[arg(long, env = "LEGATOR_CONFIG", default_value = "/etc/legator/probe.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config = if args.config.exists() {
        ProbeConfig::load(&args.config).context("loading probe config")?
    } else {
        let server_url = args
            .server_url
            .as_deref()
            .context("no config found; --server-url is required to register")?;
        let token = args
            .token
            .as_deref()
            .context("no config found; --token is required to register")?;
        let config = legator_probe::config::register(server_url, token, args.tags)
            .await
            .context("registering with control plane")?;
        config.save(&args.config).context("persisting probe config")?;
        config
    };

    let agent = ProbeAgent::new(config, args.config.clone()).context("building probe agent")?;
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            signal_cancel.cancel();
        }
    });

    agent.run(cancel).await;
    Ok(())
}
