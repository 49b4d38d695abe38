//! Daemon lifecycle: resolve the node, wire the jobs, run until signalled.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use port_cron::{Job, JobConfig, ProcessRestart, Scheduler};
use port_types::{NodeId, NodeProfile};
use tracing::{info, warn};

use crate::adapters::{FileGauge, HaproxyRuntime, JsonLinesSink, SnapshotFile};
use crate::agent::{Agent, Collaborators, SyncSettings};
use crate::collaborators::NodeSource;
use crate::config::DaemonConfig;
use crate::context::NodeContext;
use crate::error::{DaemonError, DaemonResult};
use crate::jobs::{restart_period_ticks, NodeWatchTask, ScheduledRestartTask};

/// Node property that enables the daily restart.
pub const RESTART_PROPERTY: &str = "restart";

/// The portd process
pub struct Daemon {
    config: DaemonConfig,
    node_id: NodeId,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let raw = config
            .node
            .id
            .as_deref()
            .ok_or_else(|| DaemonError::Config("node id is required".into()))?;
        let node_id = raw
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid node id {}: {}", raw, e)))?;
        Ok(Self { config, node_id })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Run until SIGINT/SIGTERM or until the scheduler loop fails.
    pub async fn run(self) -> DaemonResult<()> {
        tokio::select! {
            result = self.serve() => result,
            _ = shutdown_signal() => {
                info!("Port daemon shutting down");
                Ok(())
            }
        }
    }

    async fn serve(&self) -> DaemonResult<()> {
        let config = &self.config;
        let snapshot = Arc::new(SnapshotFile::new(&config.paths.snapshot));
        let proxy = Arc::new(HaproxyRuntime::new(&config.proxy));
        let terminator = Arc::new(
            ProcessRestart::new(config.restart.grace()).with_command(config.restart.command.clone()),
        );
        let gauge = Arc::new(FileGauge::new(&config.paths.gauge));

        let node = wait_for_node(
            snapshot.as_ref(),
            &self.node_id,
            Duration::from_secs(config.node.lookup_retry_secs.max(1)),
        )
        .await;
        info!(node = %node.id, name = %node.name, "Resolved node profile");

        let context = Arc::new(NodeContext::new(node, terminator, gauge));
        let collaborators = Collaborators {
            users: snapshot.clone(),
            traffic: proxy.clone(),
            control: proxy,
            sink: Arc::new(JsonLinesSink::new(&config.paths.spool)),
        };

        let scheduler = build_scheduler(config, context, collaborators, snapshot, Utc::now())?;
        scheduler.run().await?;
        Ok(())
    }
}

/// Look this node up until it exists.
pub async fn wait_for_node(nodes: &dyn NodeSource, id: &NodeId, retry: Duration) -> NodeProfile {
    loop {
        match nodes.fetch_node(id).await {
            Ok(Some(node)) => return node,
            Ok(None) => warn!(node = %id, retry_secs = retry.as_secs(), "Node not found, retrying"),
            Err(e) => warn!(node = %id, error = %e, "Node lookup failed, retrying"),
        }
        tokio::time::sleep(retry).await;
    }
}

/// Register the node's jobs: `sync`, `node_watch`, and `restart` when the
/// node asks for daily restarts.
pub fn build_scheduler(
    config: &DaemonConfig,
    context: Arc<NodeContext>,
    collaborators: Collaborators,
    nodes: Arc<dyn NodeSource>,
    now: DateTime<Utc>,
) -> DaemonResult<Scheduler> {
    let mut scheduler = Scheduler::new(&config.scheduler, context.terminator.clone());

    let agent = Agent::new(
        context.clone(),
        collaborators,
        SyncSettings::from_config(&config.sync, config.sensitivity),
    );
    scheduler.register(Job::new(
        JobConfig::new("sync", config.sync.period, config.sync.timeout()),
        Arc::new(agent),
    ))?;

    if context.node.has_property(RESTART_PROPERTY) {
        let offset = FixedOffset::east_opt(config.restart.utc_offset_hours * 3600).ok_or_else(
            || {
                DaemonError::Config(format!(
                    "Invalid UTC offset: {}",
                    config.restart.utc_offset_hours
                ))
            },
        )?;
        let period = restart_period_ticks(
            now,
            config.restart.hour,
            offset,
            config.restart.max_jitter_secs,
            config.scheduler.tick_period(),
        );
        info!(period_ticks = period, "Daily restart enabled");
        scheduler.register(Job::new(
            JobConfig::new("restart", period, config.restart.timeout()).skip_first_tick(),
            Arc::new(ScheduledRestartTask::new(context.clone())),
        ))?;
    }

    scheduler.register(Job::new(
        JobConfig::new("node_watch", config.node_watch.period, config.node_watch.timeout()),
        Arc::new(NodeWatchTask::new(context, nodes)),
    ))?;

    Ok(scheduler)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
