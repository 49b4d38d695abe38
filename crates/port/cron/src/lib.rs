//! # Port Cron - Periodic jobs with hung-job supervision
//!
//! A small cooperative scheduler: one control loop ticks at a fixed cadence
//! and starts named [`Job`]s on their own tokio tasks. The loop never cancels
//! a job; it only polls whether the job finished and how long it has been
//! running.
//!
//! ## Key Components
//!
//! - [`Task`]: The unit of work a job runs, plus its failure hook
//! - [`Job`]: Overlap prevention, completion checks, timeout handling
//! - [`Scheduler`]: The tick loop, aligned to its original start time
//! - [`Terminator`]: The only remedy for a hung job - restarting the process
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use port_cron::{task_fn, Job, JobConfig, ProcessRestart, Scheduler, SchedulerConfig};
//!
//! # async fn example() -> port_cron::CronResult<()> {
//! let terminator = Arc::new(ProcessRestart::new(Duration::from_secs(60)));
//! let mut scheduler = Scheduler::new(&SchedulerConfig::default(), terminator);
//!
//! let heartbeat = task_fn(|| async {
//!     tracing::info!("still alive");
//!     Ok(())
//! });
//! scheduler.register(Job::new(
//!     JobConfig::new("heartbeat", 1, Duration::from_secs(30)),
//!     Arc::new(heartbeat),
//! ))?;
//!
//! scheduler.run().await
//! # }
//! ```

pub mod error;
pub mod job;
pub mod scheduler;
pub mod task;
pub mod terminate;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::{CronError, CronResult};
pub use job::{Job, JobConfig, JobStatus};
pub use scheduler::{Scheduler, SchedulerConfig, TickReport};
pub use task::{task_fn, FnTask, Task, TaskError, TaskResult};
pub use terminate::{ProcessRestart, Terminator};
