//! Named periodic jobs.
//!
//! A job moves `Idle -> Running -> CompletedOk | CompletedWithError -> Idle`.
//! The completed states are only observed by [`Job::check`], which returns
//! the job to `Idle`. A running job past its timeout is reported as
//! `TimedOut` and, when configured as fatal, asks the [`Terminator`] for a
//! process restart; the job's task itself is never cancelled.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{CronError, CronResult};
use crate::task::{Task, TaskError, TaskResult};
use crate::terminate::Terminator;

/// Static configuration of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique name within a scheduler.
    pub name: String,

    /// Run every `period` ticks.
    pub period: u64,

    /// Wall-clock budget for one run.
    pub timeout: Duration,

    /// Do not run on tick 0.
    pub skip_first_tick: bool,

    /// Request a process restart when a run exceeds `timeout`.
    pub fatal_on_timeout: bool,
}

impl JobConfig {
    /// A job that runs every `period` ticks and is fatal on timeout.
    pub fn new(name: impl Into<String>, period: u64, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            timeout,
            skip_first_tick: false,
            fatal_on_timeout: true,
        }
    }

    pub fn skip_first_tick(mut self) -> Self {
        self.skip_first_tick = true;
        self
    }

    /// Only warn when a run exceeds its timeout.
    pub fn tolerate_timeout(mut self) -> Self {
        self.fatal_on_timeout = false;
        self
    }

    pub fn validate(&self) -> CronResult<()> {
        if self.period == 0 {
            return Err(CronError::InvalidJob {
                name: self.name.clone(),
                reason: "period must be at least one tick".into(),
            });
        }
        Ok(())
    }
}

/// State of a job as observed by one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running { elapsed: Duration },
    TimedOut { elapsed: Duration },
    CompletedOk { elapsed: Duration },
    CompletedWithError { elapsed: Duration, error: String },
}

enum Execution {
    Idle,
    Running {
        started: Instant,
        handle: JoinHandle<TaskResult>,
    },
}

/// A named, independently schedulable unit of work.
pub struct Job {
    config: JobConfig,
    task: Arc<dyn Task>,
    execution: Execution,
    restart_requested: bool,
}

impl Job {
    pub fn new(config: JobConfig, task: Arc<dyn Task>) -> Self {
        Self {
            config,
            task,
            execution: Execution::Idle,
            restart_requested: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Whether the task is still executing.
    pub fn is_running(&self) -> bool {
        match &self.execution {
            Execution::Idle => false,
            Execution::Running { handle, .. } => !handle.is_finished(),
        }
    }

    /// Whether the job should start on `tick`.
    pub fn is_due(&self, tick: u64) -> bool {
        if tick == 0 && self.config.skip_first_tick {
            return false;
        }
        tick % self.config.period.max(1) == 0
    }

    /// Process the outcome of the previous run.
    ///
    /// A finished run is reported exactly once; a failed run invokes the
    /// task's failure hook exactly once. Errors returned here come only from
    /// the terminator.
    pub async fn check(&mut self, terminator: &dyn Terminator) -> CronResult<JobStatus> {
        let started = match &self.execution {
            Execution::Idle => return Ok(JobStatus::Idle),
            Execution::Running { started, handle } if !handle.is_finished() => *started,
            Execution::Running { .. } => return Ok(self.settle().await),
        };

        let elapsed = started.elapsed();
        if elapsed <= self.config.timeout {
            return Ok(JobStatus::Running { elapsed });
        }

        if self.config.fatal_on_timeout {
            error!(
                job = %self.config.name,
                elapsed_secs = elapsed.as_secs(),
                timeout_secs = self.config.timeout.as_secs(),
                "Job timed out"
            );
            if !self.restart_requested {
                self.restart_requested = true;
                terminator
                    .terminate(&format!("job {} timed out", self.config.name))
                    .await?;
            }
        } else {
            warn!(
                job = %self.config.name,
                elapsed_secs = elapsed.as_secs(),
                "Job timed out"
            );
        }

        Ok(JobStatus::TimedOut { elapsed })
    }

    /// Start a run unless one is in flight.
    ///
    /// Returns false when skipped. Overlapping runs are never queued.
    pub async fn run(&mut self) -> bool {
        if self.is_running() {
            debug!(job = %self.config.name, "Job is running, skipping execution");
            return false;
        }
        if matches!(self.execution, Execution::Running { .. }) {
            self.settle().await;
        }

        let task = Arc::clone(&self.task);
        let handle = tokio::spawn(async move { task.run().await });
        self.execution = Execution::Running {
            started: Instant::now(),
            handle,
        };
        self.restart_requested = false;
        true
    }

    async fn settle(&mut self) -> JobStatus {
        let (started, handle) = match std::mem::replace(&mut self.execution, Execution::Idle) {
            Execution::Idle => return JobStatus::Idle,
            Execution::Running { started, handle } => (started, handle),
        };
        let elapsed = started.elapsed();

        let outcome = match handle.await {
            Ok(result) => result,
            Err(join_error) => Err(TaskError::from(format!("task aborted: {}", join_error))),
        };

        match outcome {
            Ok(()) => {
                debug!(
                    job = %self.config.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Job finished"
                );
                JobStatus::CompletedOk { elapsed }
            }
            Err(error) => {
                error!(
                    job = %self.config.name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "Job failed"
                );
                self.task.on_failure(&error).await;
                JobStatus::CompletedWithError {
                    elapsed,
                    error: error.to_string(),
                }
            }
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}
