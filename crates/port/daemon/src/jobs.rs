//! Auxiliary jobs: node profile watch and the daily restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, TimeZone, Utc};
use port_cron::{Task, TaskResult};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::collaborators::NodeSource;
use crate::context::NodeContext;

/// Restarts the process when this node's profile changes upstream.
///
/// Tags, weight, and properties are baked into the proxy configuration and
/// the eligibility policy at startup, so a restart is the only way to pick
/// them up.
pub struct NodeWatchTask {
    context: Arc<NodeContext>,
    nodes: Arc<dyn NodeSource>,
}

impl NodeWatchTask {
    pub fn new(context: Arc<NodeContext>, nodes: Arc<dyn NodeSource>) -> Self {
        Self { context, nodes }
    }
}

#[async_trait]
impl Task for NodeWatchTask {
    async fn run(&self) -> TaskResult {
        let current = &self.context.node;
        let reason = match self.nodes.fetch_node(&current.id).await? {
            None => {
                warn!(node = %current.id, "Node no longer exists");
                "node removed"
            }
            Some(fetched) if fetched.differs_from(current) => {
                warn!(
                    node = %current.id,
                    old_tags = ?current.tags,
                    new_tags = ?fetched.tags,
                    old_weight = current.weight,
                    new_weight = fetched.weight,
                    "Node profile changed"
                );
                "node profile changed"
            }
            Some(_) => {
                debug!(node = %current.id, "Node profile unchanged");
                return Ok(());
            }
        };
        self.context.terminator.terminate(reason).await?;
        Ok(())
    }
}

/// Restarts the process once its period elapses.
pub struct ScheduledRestartTask {
    context: Arc<NodeContext>,
}

impl ScheduledRestartTask {
    pub fn new(context: Arc<NodeContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Task for ScheduledRestartTask {
    async fn run(&self) -> TaskResult {
        info!(node = %self.context.node.id, "Scheduled restart");
        self.context.terminator.terminate("scheduled restart").await?;
        Ok(())
    }
}

/// Seconds from `now` until the next `hour:00` in the given offset.
///
/// A time exactly on the hour counts as already passed.
pub fn secs_until_next(now: DateTime<Utc>, hour: u32, offset: FixedOffset) -> u64 {
    let local = now.with_timezone(&offset);
    let today = local
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .and_then(|naive| offset.from_local_datetime(&naive).single());

    let Some(mut target) = today else {
        return 0;
    };
    if target <= local {
        target = match target.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => return 0,
        };
    }
    u64::try_from((target - local).num_seconds()).unwrap_or(0)
}

/// Period, in ticks, of the daily restart job registered at `now`.
///
/// Adds up to `max_jitter_secs` of random delay so a fleet does not restart
/// all at once. Never less than one tick.
pub fn restart_period_ticks(
    now: DateTime<Utc>,
    hour: u32,
    offset: FixedOffset,
    max_jitter_secs: u64,
    tick_period: Duration,
) -> u64 {
    let jitter = if max_jitter_secs == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..max_jitter_secs)
    };
    let secs = secs_until_next(now, hour, offset) + jitter;
    (secs / tick_period.as_secs().max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ActiveUserGauge;
    use crate::error::SourceResult;
    use port_cron::testing::RecordingTerminator;
    use port_types::{NodeId, NodeProfile};

    struct NullGauge;

    #[async_trait]
    impl ActiveUserGauge for NullGauge {
        async fn report(&self, _count: i64) -> SourceResult<()> {
            Ok(())
        }
    }

    struct FixedNodes(Option<NodeProfile>);

    #[async_trait]
    impl NodeSource for FixedNodes {
        async fn fetch_node(&self, _id: &NodeId) -> SourceResult<Option<NodeProfile>> {
            Ok(self.0.clone())
        }
    }

    fn context(node: NodeProfile) -> (Arc<NodeContext>, Arc<RecordingTerminator>) {
        let terminator = Arc::new(RecordingTerminator::new());
        let context = Arc::new(NodeContext::new(
            node,
            terminator.clone(),
            Arc::new(NullGauge),
        ));
        (context, terminator)
    }

    fn shanghai() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_node_keeps_running() {
        let node = NodeProfile::new(NodeId::generate(), "edge-1");
        let (context, terminator) = context(node.clone());
        let task = NodeWatchTask::new(context, Arc::new(FixedNodes(Some(node))));

        task.run().await.unwrap();
        assert_eq!(terminator.count(), 0);
    }

    #[tokio::test]
    async fn test_changed_tags_trigger_restart() {
        let node = NodeProfile::new(NodeId::generate(), "edge-1");
        let mut fetched = node.clone();
        fetched.tags.insert("premium".into());
        let (context, terminator) = context(node);
        let task = NodeWatchTask::new(context, Arc::new(FixedNodes(Some(fetched))));

        task.run().await.unwrap();
        assert_eq!(terminator.reasons(), vec!["node profile changed".to_string()]);
    }

    #[tokio::test]
    async fn test_removed_node_triggers_restart() {
        let node = NodeProfile::new(NodeId::generate(), "edge-1");
        let (context, terminator) = context(node);
        let task = NodeWatchTask::new(context, Arc::new(FixedNodes(None)));

        task.run().await.unwrap();
        assert_eq!(terminator.reasons(), vec!["node removed".to_string()]);
    }

    #[tokio::test]
    async fn test_scheduled_restart_terminates() {
        let (context, terminator) = context(NodeProfile::new(NodeId::generate(), "edge-1"));
        ScheduledRestartTask::new(context).run().await.unwrap();
        assert_eq!(terminator.count(), 1);
    }

    #[test]
    fn test_secs_until_next_same_day() {
        // 01:00 at +8
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 17, 0, 0).unwrap();
        assert_eq!(secs_until_next(now, 4, shanghai()), 3 * 3600);
    }

    #[test]
    fn test_secs_until_next_rolls_over() {
        // 04:00 at +8 exactly
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        assert_eq!(secs_until_next(now, 4, shanghai()), 24 * 3600);

        // 05:30 at +8
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 21, 30, 0).unwrap();
        assert_eq!(secs_until_next(now, 4, shanghai()), 22 * 3600 + 1800);
    }

    #[test]
    fn test_restart_period_bounds() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 17, 0, 0).unwrap();
        let tick = Duration::from_secs(60);

        assert_eq!(restart_period_ticks(now, 4, shanghai(), 0, tick), 180);
        for _ in 0..32 {
            let ticks = restart_period_ticks(now, 4, shanghai(), 600, tick);
            assert!((180..190).contains(&ticks));
        }

        // Right before the hour still waits at least one tick.
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 19, 59, 30).unwrap();
        assert_eq!(restart_period_ticks(now, 4, shanghai(), 0, tick), 1);
    }
}
