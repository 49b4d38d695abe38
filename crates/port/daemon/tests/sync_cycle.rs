//! End-to-end sync cycles against in-memory collaborators.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use port_accounting::{AccountSnapshot, Sensitivity};
use port_cron::testing::RecordingTerminator;
use port_daemon::{
    build_scheduler, ActiveUserGauge, Agent, Collaborators, DaemonConfig, NodeContext, NodeSource,
    SourceError, SourceResult, SyncSettings, TrafficControl, TrafficSource, UploadSink,
    UserSource, GAUGE_ERROR_SENTINEL,
};
use port_types::{
    Credential, NodeId, NodeProfile, TrafficSample, UploadRecord, UserId, UserRecord,
};

/// A node with a proxy, a user store, a spool, and a gauge, all in memory.
#[derive(Default)]
struct FakeNode {
    users: Mutex<Vec<UserRecord>>,
    nodes: Mutex<Vec<NodeProfile>>,
    counters: Mutex<BTreeMap<i64, (u64, u64)>>,
    live: Mutex<BTreeSet<(i64, String)>>,
    uploads: Mutex<Vec<UploadRecord>>,
    gauge: Mutex<Vec<i64>>,
    users_down: Mutex<bool>,
}

impl FakeNode {
    fn add_traffic(&self, id: i64, upload: u64, download: u64) {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(id).or_default();
        entry.0 += upload;
        entry.1 += download;
    }

    fn live(&self) -> Vec<(i64, String)> {
        self.live.lock().unwrap().iter().cloned().collect()
    }

    fn uploaded(&self, id: i64) -> (u64, u64) {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == UserId::new(id))
            .fold((0, 0), |acc, r| (acc.0 + r.upload, acc.1 + r.download))
    }

    fn last_gauge(&self) -> Option<i64> {
        self.gauge.lock().unwrap().last().copied()
    }
}

#[async_trait]
impl UserSource for FakeNode {
    async fn fetch_eligible_users(&self) -> SourceResult<Vec<UserRecord>> {
        if *self.users_down.lock().unwrap() {
            return Err(SourceError::Unavailable("database".into()));
        }
        Ok(self.users.lock().unwrap().clone())
    }
}

#[async_trait]
impl NodeSource for FakeNode {
    async fn fetch_node(&self, id: &NodeId) -> SourceResult<Option<NodeProfile>> {
        Ok(self.nodes.lock().unwrap().iter().find(|n| &n.id == id).cloned())
    }
}

#[async_trait]
impl TrafficSource for FakeNode {
    async fn fetch_counters(&self) -> SourceResult<Vec<TrafficSample>> {
        Ok(self
            .counters
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (up, down))| TrafficSample::new(UserId::new(*id), Some(*up), Some(*down)))
            .collect())
    }
}

#[async_trait]
impl TrafficControl for FakeNode {
    async fn apply_credential(&self, account: &AccountSnapshot) -> SourceResult<()> {
        let mut live = self.live.lock().unwrap();
        let id = account.user_id.get();
        let credential = account.credential.expose().to_string();
        assert!(
            !live.iter().any(|(live_id, live_credential)| *live_id == id
                && *live_credential != credential),
            "user {} would have two live credentials",
            id
        );
        live.insert((id, credential));
        Ok(())
    }

    async fn revoke_credential(&self, account: &AccountSnapshot) -> SourceResult<()> {
        self.live
            .lock()
            .unwrap()
            .remove(&(account.user_id.get(), account.credential.expose().to_string()));
        Ok(())
    }
}

#[async_trait]
impl UploadSink for FakeNode {
    async fn emit(&self, batch: &[UploadRecord]) -> SourceResult<()> {
        self.uploads.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}

#[async_trait]
impl ActiveUserGauge for FakeNode {
    async fn report(&self, count: i64) -> SourceResult<()> {
        self.gauge.lock().unwrap().push(count);
        Ok(())
    }
}

fn user(id: i64, credential: &str) -> UserRecord {
    UserRecord::new(id, Credential::new(credential)).with_balance(1 << 40)
}

fn collaborators(fake: &Arc<FakeNode>) -> Collaborators {
    Collaborators {
        users: fake.clone(),
        traffic: fake.clone(),
        control: fake.clone(),
        sink: fake.clone(),
    }
}

fn setup(node: NodeProfile) -> (Arc<FakeNode>, Arc<NodeContext>, Arc<RecordingTerminator>) {
    let fake = Arc::new(FakeNode::default());
    fake.nodes.lock().unwrap().push(node.clone());
    let terminator = Arc::new(RecordingTerminator::new());
    let context = Arc::new(NodeContext::new(node, terminator.clone(), fake.clone()));
    (fake, context, terminator)
}

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

#[tokio::test]
async fn test_user_lifecycle_across_cycles() {
    let (fake, context, _) = setup(NodeProfile::new(NodeId::generate(), "edge-1"));
    let agent = Agent::new(context, collaborators(&fake), SyncSettings::default());

    // Provision.
    *fake.users.lock().unwrap() = vec![user(1, "alpha"), user(2, "beta")];
    agent.sync_cycle().await.unwrap();
    assert_eq!(
        fake.live(),
        vec![(1, "alpha".to_string()), (2, "beta".to_string())]
    );

    // A busy user crosses the ceiling at once.
    fake.add_traffic(1, 3 * MIB, MIB);
    let report = agent.sync_cycle().await.unwrap();
    assert_eq!(report.reported, 1);
    assert_eq!(report.active, 1);
    assert_eq!(fake.uploaded(1), (3 * MIB, MIB));
    assert_eq!(fake.last_gauge(), Some(1));

    // A light user is reported once its threshold has decayed far enough.
    fake.add_traffic(2, 300 * KIB, 0);
    let mut cycles = 0;
    while fake.uploaded(2) == (0, 0) {
        agent.sync_cycle().await.unwrap();
        cycles += 1;
        assert!(cycles <= Sensitivity::DEFAULT.decay_steps() + 1);
    }
    assert_eq!(fake.uploaded(2), (300 * KIB, 0));
    assert_eq!(fake.last_gauge(), Some(0));

    // Credential rotation keeps one live credential and the counters.
    fake.add_traffic(1, 10 * KIB, 0);
    *fake.users.lock().unwrap() = vec![user(1, "alpha-2"), user(2, "beta")];
    let report = agent.sync_cycle().await.unwrap();
    assert_eq!(report.altered, 1);
    assert_eq!(
        fake.live(),
        vec![(1, "alpha-2".to_string()), (2, "beta".to_string())]
    );
    assert_eq!(fake.uploaded(1), (3 * MIB + 10 * KIB, MIB));

    // Removal revokes and keeps the account around, disabled.
    *fake.users.lock().unwrap() = vec![user(2, "beta")];
    agent.sync_cycle().await.unwrap();
    assert_eq!(fake.live(), vec![(2, "beta".to_string())]);
    assert_eq!(agent.with_ledger(|l| (l.len(), l.enabled_count())).await, (2, 1));

    // Coming back re-enables without a new account.
    *fake.users.lock().unwrap() = vec![user(1, "alpha-2"), user(2, "beta")];
    agent.sync_cycle().await.unwrap();
    assert_eq!(fake.live().len(), 2);
    assert_eq!(agent.with_ledger(|l| l.enabled_count()).await, 2);
}

#[tokio::test]
async fn test_counters_never_go_backwards() {
    let (fake, context, _) = setup(NodeProfile::new(NodeId::generate(), "edge-1"));
    let agent = Agent::new(context, collaborators(&fake), SyncSettings::default());
    *fake.users.lock().unwrap() = vec![user(1, "alpha")];
    agent.sync_cycle().await.unwrap();

    fake.add_traffic(1, 2 * MIB, 0);
    agent.sync_cycle().await.unwrap();

    // Proxy counters reset, e.g. after a reload; nothing is reported twice.
    fake.counters.lock().unwrap().insert(1, (10, 0));
    agent.sync_cycle().await.unwrap();
    agent.sync_cycle().await.unwrap();
    assert_eq!(fake.uploaded(1), (2 * MIB, 0));
}

#[tokio::test]
async fn test_restarted_agent_does_not_report_old_counters() {
    let (fake, context, _) = setup(NodeProfile::new(NodeId::generate(), "edge-1"));
    *fake.users.lock().unwrap() = vec![user(1, "alpha")];

    let first = Agent::new(context.clone(), collaborators(&fake), SyncSettings::default());
    first.sync_cycle().await.unwrap();
    fake.add_traffic(1, 2 * MIB, 0);
    first.sync_cycle().await.unwrap();
    assert_eq!(fake.uploaded(1), (2 * MIB, 0));
    drop(first);

    // The proxy keeps its counters and map across an agent restart.
    let restarted = Agent::new(context, collaborators(&fake), SyncSettings::default());
    let report = restarted.sync_cycle().await.unwrap();
    assert_eq!(report.provisioned, 1);
    assert_eq!(report.settled, 0);
    restarted.sync_cycle().await.unwrap();
    assert_eq!(fake.uploaded(1), (2 * MIB, 0));
    assert_eq!(fake.live(), vec![(1, "alpha".to_string())]);

    // Only traffic seen after the restart is reported.
    fake.add_traffic(1, 2 * MIB, 0);
    restarted.sync_cycle().await.unwrap();
    assert_eq!(fake.uploaded(1), (4 * MIB, 0));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_reports_error_sentinel_on_failure() {
    let node = NodeProfile::new(NodeId::generate(), "edge-1");
    let (fake, context, terminator) = setup(node);
    *fake.users.lock().unwrap() = vec![user(1, "alpha")];
    *fake.users_down.lock().unwrap() = true;

    let mut scheduler = build_scheduler(
        &DaemonConfig::default(),
        context,
        collaborators(&fake),
        fake.clone(),
        Utc::now(),
    )
    .unwrap();
    assert_eq!(scheduler.job_names(), vec!["sync", "node_watch"]);

    scheduler.tick().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    scheduler.tick().await.unwrap();
    assert_eq!(fake.last_gauge(), Some(GAUGE_ERROR_SENTINEL));

    *fake.users_down.lock().unwrap() = false;
    tokio::time::sleep(Duration::from_secs(60)).await;
    scheduler.tick().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    scheduler.tick().await.unwrap();
    assert_eq!(fake.last_gauge(), Some(0));
    assert_eq!(fake.live(), vec![(1, "alpha".to_string())]);
    assert_eq!(terminator.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_node_change_requests_restart() {
    let mut node = NodeProfile::new(NodeId::generate(), "edge-1");
    node.properties.insert("restart".into());
    let (fake, context, terminator) = setup(node);

    let now = Utc.with_ymd_and_hms(2024, 3, 1, 17, 0, 0).unwrap();
    let mut scheduler = build_scheduler(
        &DaemonConfig::default(),
        context,
        collaborators(&fake),
        fake.clone(),
        now,
    )
    .unwrap();
    assert_eq!(scheduler.job_names(), vec!["sync", "restart", "node_watch"]);

    scheduler.tick().await.unwrap();
    fake.nodes.lock().unwrap()[0].weight = 0.0;
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(60)).await;
        scheduler.tick().await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(terminator.reasons(), vec!["node profile changed".to_string()]);
}
