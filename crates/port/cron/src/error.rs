//! Error types for port-cron crate.

use thiserror::Error;

/// Errors that stop the scheduler's own loop.
///
/// Failures inside a job's task never surface here; they are isolated by the
/// job and reported through the task's failure hook.
#[derive(Debug, Error)]
pub enum CronError {
    /// A job with this name is already registered.
    #[error("job already registered: {0}")]
    DuplicateJob(String),

    /// Job configuration cannot be scheduled.
    #[error("invalid job {name}: {reason}")]
    InvalidJob { name: String, reason: String },

    /// The process restart could not be carried out.
    #[error("restart failed: {0}")]
    Terminate(String),
}

/// Result type for scheduler operations.
pub type CronResult<T> = Result<T, CronError>;
