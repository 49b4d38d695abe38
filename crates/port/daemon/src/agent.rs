//! The sync cycle: reconcile users, collect traffic, report deltas.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use port_accounting::{
    EligibilityPolicy, Ledger, ReconcileDiff, SampleOutcome, Sensitivity,
};
use port_cron::{Task, TaskError, TaskResult};
use port_types::{UploadRecord, UserId};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::collaborators::{
    TrafficControl, TrafficSource, UploadSink, UserSource, GAUGE_ERROR_SENTINEL,
};
use crate::config::{SyncConfig, DEFAULT_ACTIVE_THRESHOLD};
use crate::context::NodeContext;
use crate::error::{AgentError, AgentResult};

/// The collaborators one agent drives.
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserSource>,
    pub traffic: Arc<dyn TrafficSource>,
    pub control: Arc<dyn TrafficControl>,
    pub sink: Arc<dyn UploadSink>,
}

/// Tunables of the sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub min_balance: i64,
    pub active_threshold: u64,
    pub stop_file: Option<PathBuf>,
    pub sensitivity: Sensitivity,
}

impl SyncSettings {
    pub fn from_config(sync: &SyncConfig, sensitivity: Sensitivity) -> Self {
        Self {
            min_balance: sync.min_balance,
            active_threshold: sync.active_threshold,
            stop_file: sync.stop_file.clone(),
            sensitivity,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            min_balance: port_accounting::eligibility::DEFAULT_MIN_BALANCE,
            active_threshold: DEFAULT_ACTIVE_THRESHOLD,
            stop_file: None,
            sensitivity: Sensitivity::DEFAULT,
        }
    }
}

/// Outcome of one successful sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub provisioned: usize,
    pub revoked: usize,
    pub altered: usize,
    /// Records emitted while settling toggled users.
    pub settled: usize,
    pub reported: usize,
    /// Users whose emitted delta this cycle exceeded the active threshold.
    pub active: usize,
}

/// Records one emit produced, and how many of them count as active.
#[derive(Debug, Clone, Copy, Default)]
struct Emitted {
    records: usize,
    active: usize,
}

/// Keeps this node's accounts in line with the user source and reports
/// their traffic.
///
/// The ledger is only ever written from [`Agent::sync_cycle`], which the
/// scheduler never runs twice at once; the mutex makes that explicit.
pub struct Agent {
    context: Arc<NodeContext>,
    collaborators: Collaborators,
    policy: EligibilityPolicy,
    settings: SyncSettings,
    ledger: Mutex<Ledger>,
}

impl Agent {
    pub fn new(
        context: Arc<NodeContext>,
        collaborators: Collaborators,
        settings: SyncSettings,
    ) -> Self {
        let policy = EligibilityPolicy::for_node(&context.node, settings.min_balance);
        let ledger = Mutex::new(Ledger::new(settings.sensitivity));
        Self {
            context,
            collaborators,
            policy,
            settings,
            ledger,
        }
    }

    pub fn context(&self) -> &NodeContext {
        &self.context
    }

    /// Read access to the ledger, for inspection between cycles.
    pub async fn with_ledger<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        let ledger = self.ledger.lock().await;
        f(&ledger)
    }

    /// Run one full cycle. The first failing action aborts the cycle.
    #[instrument(skip(self), fields(node = %self.context.node.id))]
    pub async fn sync_cycle(&self) -> AgentResult<CycleReport> {
        let mut ledger = self.ledger.lock().await;

        let (diff, settled) = timed("reconcile_users", self.reconcile_users(&mut ledger)).await?;
        timed("collect_traffic", self.collect_traffic(&mut ledger)).await?;
        let reported = timed("report_traffic", self.report_traffic(&mut ledger)).await?;

        let active = settled.active + reported.active;
        if let Err(e) = self.context.gauge.report(active as i64).await {
            warn!(error = %e, "Failed to report active users");
        }

        let report = CycleReport {
            provisioned: diff.added.len(),
            revoked: diff.removed.len(),
            altered: diff.altered.len(),
            settled: settled.records,
            reported: reported.records,
            active,
        };
        debug!(
            users = ledger.len(),
            enabled = ledger.enabled_count(),
            reported = report.reported,
            active = report.active,
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Diff the authoritative users against the ledger and push the result
    /// to the proxy.
    ///
    /// When anything changed, works on a staged copy of the ledger that
    /// replaces the live one only after every revocation, provision, and
    /// settlement succeeded, so a failed cycle is recomputed in full on the
    /// next one.
    async fn reconcile_users(&self, ledger: &mut Ledger) -> AgentResult<(ReconcileDiff, Emitted)> {
        let fetched = self
            .collaborators
            .users
            .fetch_eligible_users()
            .await
            .map_err(AgentError::during("fetch users"))?;
        let fetched_count = fetched.len();
        let eligible = self.policy.filter(fetched);
        debug!(
            fetched = fetched_count,
            eligible = eligible.len(),
            "Fetched users"
        );

        let stop = self.stop_requested().await;
        let unchanged = if stop {
            ledger.enabled_count() == 0
        } else {
            !ledger.has_changes(&eligible)
        };
        if unchanged {
            if !stop {
                // Refreshes balances and tags; rejects duplicate ids.
                ledger.reconcile(eligible)?;
            }
            return Ok((ReconcileDiff::default(), Emitted::default()));
        }

        let mut staged = ledger.clone();
        let mut diff = staged.reconcile(eligible)?;
        if stop {
            warn!("Stop file present, revoking every user");
            diff = staged.revoke_all(diff);
        }

        for snapshot in &diff.removed {
            self.collaborators
                .control
                .revoke_credential(snapshot)
                .await
                .map_err(AgentError::during("revoke credential"))?;
        }
        for snapshot in &diff.added {
            self.collaborators
                .control
                .apply_credential(snapshot)
                .await
                .map_err(AgentError::during("apply credential"))?;
        }

        let settled = self.settle(&mut staged, &diff).await?;
        staged.apply_toggles(&diff);
        *ledger = staged;

        info!(
            provisioned = diff.added.len(),
            revoked = diff.removed.len(),
            altered = diff.altered.len(),
            "Applied user changes"
        );
        Ok((diff, settled))
    }

    /// Report whatever the toggled accounts have pending, since toggling
    /// resets their baseline.
    ///
    /// Accounts created this cycle only take the proxy's current counters as
    /// their baseline: those counters may predate this process and were
    /// already accounted for by whoever ran before it.
    async fn settle(&self, staged: &mut Ledger, diff: &ReconcileDiff) -> AgentResult<Emitted> {
        let touched = diff.touched();
        let samples = self
            .collaborators
            .traffic
            .fetch_counters()
            .await
            .map_err(AgentError::during("fetch counters"))?;
        for sample in samples.iter().filter(|s| touched.contains(&s.user_id)) {
            staged.apply_sample(sample);
        }
        for id in &diff.created {
            if let Some(account) = staged.get_mut(id) {
                account.reset();
            }
        }

        let timestamp = chrono::Utc::now().timestamp();
        let mut records: Vec<UploadRecord> = touched
            .iter()
            .filter_map(|id| staged.get(id))
            .filter(|account| account.pending_bytes() > 0)
            .map(|account| {
                let (upload, download) = account.diff();
                UploadRecord {
                    user_id: account.user_id(),
                    node_id: self.context.node.id,
                    upload,
                    download,
                    timestamp,
                }
            })
            .collect();
        if records.is_empty() {
            return Ok(Emitted::default());
        }
        records.sort_by_key(|r| r.user_id);

        self.collaborators
            .sink
            .emit(&records)
            .await
            .map_err(AgentError::during("settle traffic"))?;
        let active = self.count_active(&records);
        info!(count = records.len(), active, "Settled traffic of toggled users");
        Ok(Emitted {
            records: records.len(),
            active,
        })
    }

    /// Pull the proxy's counters into the ledger.
    ///
    /// Returns the number of accounts whose counters moved.
    async fn collect_traffic(&self, ledger: &mut Ledger) -> AgentResult<usize> {
        let samples = self
            .collaborators
            .traffic
            .fetch_counters()
            .await
            .map_err(AgentError::during("fetch counters"))?;

        let mut changed = 0;
        let mut violations: HashSet<UserId> = HashSet::new();
        for sample in &samples {
            match ledger.apply_sample(sample) {
                SampleOutcome::UnknownUser => {
                    debug!(user_id = %sample.user_id, "Traffic for unknown user");
                }
                SampleOutcome::Unchanged => {}
                SampleOutcome::Increased { enabled: true } => changed += 1,
                SampleOutcome::Increased { enabled: false } => {
                    changed += 1;
                    violations.insert(sample.user_id);
                }
            }
        }

        for id in violations {
            let Some(account) = ledger.get(&id) else {
                continue;
            };
            warn!(user_id = %id, "User is disabled but had traffic, revoking again");
            if let Err(e) = self
                .collaborators
                .control
                .revoke_credential(&account.snapshot())
                .await
            {
                warn!(user_id = %id, error = %e, "Failed to revoke disabled user");
            }
        }

        Ok(changed)
    }

    /// Emit the deltas of accounts whose threshold was reached and reset them.
    async fn report_traffic(&self, ledger: &mut Ledger) -> AgentResult<Emitted> {
        let timestamp = chrono::Utc::now().timestamp();
        let mut records = Vec::new();
        for account in ledger.iter_mut() {
            if account.pending_bytes() == 0 || !account.needs_report() {
                continue;
            }
            let (upload, download) = account.diff();
            records.push(UploadRecord {
                user_id: account.user_id(),
                node_id: self.context.node.id,
                upload,
                download,
                timestamp,
            });
        }
        if records.is_empty() {
            return Ok(Emitted::default());
        }
        records.sort_by_key(|r| r.user_id);

        self.collaborators
            .sink
            .emit(&records)
            .await
            .map_err(AgentError::during("emit traffic"))?;

        for record in &records {
            if let Some(account) = ledger.get_mut(&record.user_id) {
                account.reset();
            }
        }
        let active = self.count_active(&records);
        info!(reported = records.len(), active, "Reported traffic");
        Ok(Emitted {
            records: records.len(),
            active,
        })
    }

    /// A user is active when their delta strictly exceeds the threshold.
    fn count_active(&self, records: &[UploadRecord]) -> usize {
        records
            .iter()
            .filter(|record| record.total() > self.settings.active_threshold)
            .count()
    }

    async fn stop_requested(&self) -> bool {
        match &self.settings.stop_file {
            Some(path) => matches!(tokio::fs::try_exists(path).await, Ok(true)),
            None => false,
        }
    }
}

#[async_trait]
impl Task for Agent {
    async fn run(&self) -> TaskResult {
        self.sync_cycle().await?;
        Ok(())
    }

    async fn on_failure(&self, error: &TaskError) {
        error!(error = %error, "Sync failed, reporting error to the active user gauge");
        if let Err(e) = self.context.gauge.report(GAUGE_ERROR_SENTINEL).await {
            warn!(error = %e, "Failed to report sync error");
        }
    }
}

async fn timed<T, F>(action: &'static str, fut: F) -> AgentResult<T>
where
    F: Future<Output = AgentResult<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => info!(action, elapsed_ms, "Action finished"),
        Err(e) => error!(action, elapsed_ms, error = %e, "Action failed"),
    }
    result
}
