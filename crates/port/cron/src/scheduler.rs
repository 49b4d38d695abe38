//! The tick loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument};

use crate::error::{CronError, CronResult};
use crate::job::{Job, JobStatus};
use crate::terminate::Terminator;

/// Shortest sleep between two ticks, even when the loop is behind schedule.
pub const MIN_TICK_SLEEP: Duration = Duration::from_secs(1);

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    #[serde(default = "default_tick_period_secs")]
    pub tick_period_secs: u64,
}

fn default_tick_period_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period_secs: default_tick_period_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_period_secs.max(1))
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,

    /// Jobs started on this tick.
    pub started: Vec<String>,

    /// Status of every job as checked before starting new runs.
    pub statuses: Vec<(String, JobStatus)>,
}

/// Runs registered jobs on a fixed cadence.
pub struct Scheduler {
    jobs: Vec<Job>,
    tick: u64,
    tick_period: Duration,
    terminator: Arc<dyn Terminator>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, terminator: Arc<dyn Terminator>) -> Self {
        Self {
            jobs: Vec::new(),
            tick: 0,
            tick_period: config.tick_period(),
            terminator,
        }
    }

    /// Add a job. Names must be unique.
    pub fn register(&mut self, job: Job) -> CronResult<()> {
        job.config().validate()?;
        if self.jobs.iter().any(|j| j.name() == job.name()) {
            return Err(CronError::DuplicateJob(job.name().to_string()));
        }
        info!(
            job = %job.name(),
            period = job.config().period,
            timeout_secs = job.config().timeout.as_secs(),
            "Registered job"
        );
        self.jobs.push(job);
        Ok(())
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(Job::name).collect()
    }

    /// Number of ticks executed so far.
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Execute one tick: check every job, then start the due ones.
    #[instrument(skip(self), fields(tick = self.tick))]
    pub async fn tick(&mut self) -> CronResult<TickReport> {
        let tick = self.tick;
        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        for job in &mut self.jobs {
            let status = job.check(self.terminator.as_ref()).await?;
            report.statuses.push((job.name().to_string(), status));

            if job.is_due(tick) && job.run().await {
                report.started.push(job.name().to_string());
            }
        }

        debug!(started = report.started.len(), "Tick complete");
        self.tick += 1;
        Ok(report)
    }

    /// Run until the terminator fails.
    ///
    /// Tick `n` is aimed at `start + n * tick_period`, so slow ticks do not
    /// accumulate drift.
    pub async fn run(mut self) -> CronResult<()> {
        info!(
            jobs = self.jobs.len(),
            tick_period_secs = self.tick_period.as_secs(),
            "Starting scheduler"
        );
        let start = Instant::now();

        loop {
            if let Err(e) = self.tick().await {
                error!(error = %e, "Scheduler loop stopped");
                return Err(e);
            }

            let ticks = u32::try_from(self.tick).unwrap_or(u32::MAX);
            let target = start + self.tick_period * ticks;
            let earliest = Instant::now() + MIN_TICK_SLEEP;
            tokio::time::sleep_until(target.max(earliest)).await;
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.jobs)
            .field("tick", &self.tick)
            .field("tick_period", &self.tick_period)
            .finish()
    }
}
