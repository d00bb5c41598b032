use std::sync::Arc;

use anyhow::{Context, Result};
use common::{default_config_path, AgentConfig};
use db::SqlxConnectionFactory;
use sync_engine::AgentHandle;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs the replication engine as a standalone process: loads configuration,
/// starts the scheduler, and keeps running until interrupted. Pass `--once`
/// to run a single tick (triggers install + one fetch/apply pass per pair)
/// and exit — useful for cron-driven deployments or smoke-testing a config.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent=info,sync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config_path = std::env::var("SYNC_AGENT_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());

    info!(path = %config_path.display(), "loading configuration");
    let config = AgentConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    info!(node_id = %config.node_id(), pairs = config.sync_pairs.len(), "configuration loaded");

    let factory = Arc::new(SqlxConnectionFactory);
    let run_once = std::env::args().any(|a| a == "--once");

    if run_once {
        let handle = AgentHandle::start(config, factory);
        handle.run_one_tick_now().await?;
        handle.stop().await;
        info!("single tick complete, exiting");
        return Ok(());
    }

    let handle = AgentHandle::start(config, factory);
    info!("scheduler started");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    handle.stop().await;

    Ok(())
}
