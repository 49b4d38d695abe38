//! Test helpers for code that drives a [`Scheduler`](crate::Scheduler).

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CronResult;
use crate::terminate::Terminator;

/// A [`Terminator`] that records restart requests instead of exiting.
#[derive(Debug, Default)]
pub struct RecordingTerminator {
    reasons: Mutex<Vec<String>>,
}

impl RecordingTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.reasons().len()
    }
}

#[async_trait]
impl Terminator for RecordingTerminator {
    async fn terminate(&self, reason: &str) -> CronResult<()> {
        if let Ok(mut reasons) = self.reasons.lock() {
            reasons.push(reason.to_string());
        }
        Ok(())
    }
}
