//! Process restart as the remedy for hung jobs.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::{CronError, CronResult};

/// Exit status asking the supervisor to restart us (EX_TEMPFAIL).
pub const RESTART_EXIT_CODE: i32 = 75;

/// Capability to end the process so a supervisor can restart it.
#[async_trait]
pub trait Terminator: Send + Sync {
    /// Request a restart. Implementations that actually exit never return.
    async fn terminate(&self, reason: &str) -> CronResult<()>;
}

/// Restart by exiting the process after a grace delay.
///
/// An optional command (for example a host reboot helper) runs before exit.
#[derive(Debug, Clone)]
pub struct ProcessRestart {
    grace: Duration,
    command: Vec<String>,
    exit_code: i32,
}

impl ProcessRestart {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            command: Vec::new(),
            exit_code: RESTART_EXIT_CODE,
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }
}

#[async_trait]
impl Terminator for ProcessRestart {
    async fn terminate(&self, reason: &str) -> CronResult<()> {
        error!(
            reason = %reason,
            grace_secs = self.grace.as_secs(),
            "Restarting process"
        );
        tokio::time::sleep(self.grace).await;

        if let Some((program, args)) = self.command.split_first() {
            let status = tokio::process::Command::new(program)
                .args(args)
                .status()
                .await
                .map_err(|e| CronError::Terminate(format!("{}: {}", program, e)))?;
            if !status.success() {
                warn!(program = %program, status = %status, "Restart command failed");
            }
        }

        std::process::exit(self.exit_code)
    }
}
