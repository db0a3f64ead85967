mod auth;
mod config;
mod dbaas;
mod exporter;
mod metrics;
mod poller;

use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::dbaas::DbaasClient;
use crate::exporter::DbaasGauges;
use crate::poller::Poller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    // Run a single poll cycle and dump the exposition to stdout.
    let oneshot = env::args().any(|arg| arg == "--oneshot");

    let config = Config::load(Path::new(config::DEFAULT_CONFIG_PATH))
        .context("invalid configuration")?;
    let listen_addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr `{}`", config.listen_addr))?;

    let gauges = Arc::new(DbaasGauges::new().context("failed to build gauge registry")?);
    let client = DbaasClient::new(&config).context("failed to build API client")?;
    let poller = Poller::new(
        client,
        gauges.clone(),
        config.databases.clone(),
        Duration::from_secs(config.poll_interval),
    );

    if oneshot {
        info!("running in oneshot mode");
        poller.poll_cycle().await;
        print!("{}", gauges.render()?);
        return Ok(());
    }

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tokio::spawn(async move {
        if let Err(e) = exporter::serve(gauges, listener).await {
            error!(error = %e, "metrics endpoint failed");
            std::process::exit(1);
        }
    });

    info!(
        databases = config.databases.len(),
        interval = config.poll_interval,
        "starting poll loop"
    );
    poller.run().await;
    Ok(())
}
