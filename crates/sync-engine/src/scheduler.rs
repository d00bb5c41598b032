use std::sync::Arc;
use std::time::Duration;

use common::{AgentConfig, EngineError, NodeId, Result, Side, SyncPairConfig};
use db::ConnectionFactory as DbConnectionFactory;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::driver::ReplicationDriver;
use crate::schema::SchemaBootstrapper;
use crate::store::{SqlStore, SyncStore};
use crate::triggers::TriggerSynthesizer;

/// How late a tick is allowed to fire and still run as scheduled, rather
/// than being skipped to realign with the configured cadence (§4.9).
const MISFIRE_GRACE: Duration = Duration::from_secs(60);

enum Command {
    RunOnce(oneshot::Sender<Result<()>>),
    ReloadConfig(AgentConfig, oneshot::Sender<Result<()>>),
    RebuildTriggers(oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Operator handle to a running scheduler (§4.9, §4.8). Owns the background
/// task; dropping it without calling `stop` leaves the task running
/// detached, so callers should always `stop` on shutdown.
pub struct AgentHandle {
    commands: mpsc::Sender<Command>,
    join: tokio::task::JoinHandle<()>,
}

impl AgentHandle {
    /// Starts the scheduler: runs one tick immediately, then ticks every
    /// `sync_interval_minutes` until stopped.
    pub fn start(config: AgentConfig, factory: Arc<dyn DbConnectionFactory>) -> Self {
        let (tx, rx) = mpsc::channel(8);
        let join = tokio::spawn(run(config, factory, rx));
        Self { commands: tx, join }
    }

    pub async fn run_one_tick_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::RunOnce(tx))
            .await
            .map_err(|_| EngineError::Scheduler("scheduler task not running".into()))?;
        rx.await
            .map_err(|_| EngineError::Scheduler("scheduler task dropped reply".into()))?
    }

    pub async fn reload_config(&self, config: AgentConfig) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::ReloadConfig(config, tx))
            .await
            .map_err(|_| EngineError::Scheduler("scheduler task not running".into()))?;
        rx.await
            .map_err(|_| EngineError::Scheduler("scheduler task dropped reply".into()))?
    }

    pub async fn rebuild_triggers(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::RebuildTriggers(tx))
            .await
            .map_err(|_| EngineError::Scheduler("scheduler task not running".into()))?;
        rx.await
            .map_err(|_| EngineError::Scheduler("scheduler task dropped reply".into()))?
    }

    pub async fn stop(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let _ = self.join.await;
    }
}

async fn run(
    initial_config: AgentConfig,
    factory: Arc<dyn DbConnectionFactory>,
    mut commands: mpsc::Receiver<Command>,
) {
    let config = Arc::new(RwLock::new(initial_config));
    let mut next_run = Instant::now();

    loop {
        let sleep_until = next_run;
        tokio::select! {
            _ = tokio::time::sleep_until(sleep_until) => {
                let late_by = Instant::now().saturating_duration_since(sleep_until);
                if late_by > MISFIRE_GRACE {
                    warn!(?late_by, "tick missed misfire grace window, skipping to realign");
                } else {
                    let cfg = config.read().await;
                    if let Err(e) = run_all_pairs(&cfg, factory.as_ref()).await {
                        error!(error = %e, "scheduled tick failed");
                    }
                }
                let interval_minutes = config.read().await.sync_interval_minutes;
                next_run = Instant::now() + Duration::from_secs(u64::from(interval_minutes) * 60);
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::RunOnce(reply)) => {
                        let cfg = config.read().await;
                        let result = run_all_pairs(&cfg, factory.as_ref()).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::ReloadConfig(new_config, reply)) => {
                        *config.write().await = new_config;
                        info!("configuration reloaded");
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::RebuildTriggers(reply)) => {
                        let cfg = config.read().await;
                        let result = rebuild_all_triggers(&cfg, factory.as_ref()).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => {
                        info!("scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}

async fn run_all_pairs(config: &AgentConfig, factory: &dyn DbConnectionFactory) -> Result<()> {
    for pair in &config.sync_pairs {
        if let Err(e) = run_one_pair(pair, factory).await {
            error!(pair = %pair.name, error = %e, "sync pair failed");
        }
    }
    Ok(())
}

async fn run_one_pair(
    pair: &SyncPairConfig,
    factory: &dyn DbConnectionFactory,
) -> Result<()> {
    let local_node = NodeId::for_pair_side(&pair.name, Side::Local);
    let cloud_node = NodeId::for_pair_side(&pair.name, Side::Cloud);

    let local_session = Arc::from(factory.connect(&pair.local).await?);
    let cloud_session = Arc::from(factory.connect(&pair.cloud).await?);
    let local_store = SqlStore::new(local_session.clone());
    let cloud_store = SqlStore::new(cloud_session.clone());

    SchemaBootstrapper::ensure_schema(&local_store).await?;
    SchemaBootstrapper::ensure_schema(&cloud_store).await?;

    let local_tables = SchemaBootstrapper::resolve_tables(&local_store, &pair.tables).await?;
    TriggerSynthesizer::install_all(local_session.as_ref(), &local_tables, &local_node).await?;

    let cloud_tables = SchemaBootstrapper::resolve_tables(&cloud_store, &pair.tables).await?;
    TriggerSynthesizer::install_all(cloud_session.as_ref(), &cloud_tables, &cloud_node).await?;

    ReplicationDriver::run_direction(
        &local_store,
        &cloud_store,
        &local_node,
        &cloud_node,
        Side::Local,
        pair,
        &local_tables,
    )
    .await?;

    ReplicationDriver::run_direction(
        &cloud_store,
        &local_store,
        &cloud_node,
        &local_node,
        Side::Cloud,
        pair,
        &cloud_tables,
    )
    .await?;

    Ok(())
}

async fn rebuild_all_triggers(config: &AgentConfig, factory: &dyn DbConnectionFactory) -> Result<()> {
    for pair in &config.sync_pairs {
        let local_node = NodeId::for_pair_side(&pair.name, Side::Local);
        let cloud_node = NodeId::for_pair_side(&pair.name, Side::Cloud);

        let local_session: Arc<dyn db::DbSession> = Arc::from(factory.connect(&pair.local).await?);
        let cloud_session: Arc<dyn db::DbSession> = Arc::from(factory.connect(&pair.cloud).await?);
        let local_store = SqlStore::new(local_session.clone());
        let cloud_store = SqlStore::new(cloud_session.clone());

        let local_tables = SchemaBootstrapper::resolve_tables(&local_store, &pair.tables).await?;
        TriggerSynthesizer::install_all(local_session.as_ref(), &local_tables, &local_node).await?;

        let cloud_tables = SchemaBootstrapper::resolve_tables(&cloud_store, &pair.tables).await?;
        TriggerSynthesizer::install_all(cloud_session.as_ref(), &cloud_tables, &cloud_node).await?;
    }
    Ok(())
}
