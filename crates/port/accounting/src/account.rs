//! Per-user traffic accounting.
//!
//! An [`Account`] tracks cumulative upload/download counters for one user,
//! the baseline at the last report, and an adaptive report threshold.

use port_types::{Credential, UserId, UserRecord};
use serde::{Deserialize, Serialize};

use crate::error::{AccountingError, AccountingResult};

const UPLOAD: usize = 0;
const DOWNLOAD: usize = 1;

/// Bounds of the adaptive report threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensitivity {
    /// Lowest threshold an idle account decays to, in bytes.
    pub floor: u64,

    /// Threshold restored after every report, in bytes.
    pub ceiling: u64,
}

impl Sensitivity {
    /// 100 KiB floor, 1 MiB ceiling.
    pub const DEFAULT: Sensitivity = Sensitivity {
        floor: 100 * 1024,
        ceiling: 1024 * 1024,
    };

    pub fn new(floor: u64, ceiling: u64) -> AccountingResult<Self> {
        let sensitivity = Self { floor, ceiling };
        sensitivity.validate()?;
        Ok(sensitivity)
    }

    pub fn validate(&self) -> AccountingResult<()> {
        if self.floor == 0 || self.floor > self.ceiling {
            return Err(AccountingError::InvalidSensitivity {
                floor: self.floor,
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }

    /// Number of idle checks after which the threshold sits at the floor.
    pub fn decay_steps(&self) -> u32 {
        let mut threshold = self.ceiling;
        let mut steps = 0;
        while threshold > self.floor {
            threshold = (threshold / 2).max(self.floor);
            steps += 1;
        }
        steps
    }
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The fields needed to revoke an account's credential downstream.
///
/// Taken before an account's user record is replaced so the old credential
/// can still be pulled from the live proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub user_id: UserId,
    pub credential: Credential,
}

/// Traffic-accounting and enablement state for one user.
#[derive(Debug, Clone)]
pub struct Account {
    user: UserRecord,
    traffic: [u64; 2],
    last_traffic: [u64; 2],
    threshold: u64,
    sensitivity: Sensitivity,
    enabled: bool,
}

impl Account {
    /// Create an enabled account with the default sensitivity.
    pub fn new(user: UserRecord) -> Self {
        Self::with_sensitivity(user, Sensitivity::DEFAULT)
    }

    pub fn with_sensitivity(user: UserRecord, sensitivity: Sensitivity) -> Self {
        Self {
            user,
            traffic: [0, 0],
            last_traffic: [0, 0],
            threshold: sensitivity.ceiling,
            sensitivity,
            enabled: true,
        }
    }

    pub fn user(&self) -> &UserRecord {
        &self.user
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn credential(&self) -> &Credential {
        &self.user.credential
    }

    /// Swap in a fresh user record, keeping counters. Returns the old record.
    pub fn replace_user(&mut self, user: UserRecord) -> UserRecord {
        std::mem::replace(&mut self.user, user)
    }

    /// Cumulative `(upload, download)` bytes observed.
    pub fn traffic(&self) -> (u64, u64) {
        (self.traffic[UPLOAD], self.traffic[DOWNLOAD])
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Raise each present counter to `max(current, value)`.
    ///
    /// Returns true iff at least one counter strictly increased. Stale or
    /// out-of-order readings never move a counter backwards.
    pub fn update_traffic(&mut self, upload: Option<u64>, download: Option<u64>) -> bool {
        let mut changed = false;
        for (slot, reading) in [(UPLOAD, upload), (DOWNLOAD, download)] {
            if let Some(value) = reading {
                if value > self.traffic[slot] {
                    self.traffic[slot] = value;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Unreported `(upload, download)` bytes since the last reset.
    pub fn diff(&self) -> (u64, u64) {
        (
            self.traffic[UPLOAD].saturating_sub(self.last_traffic[UPLOAD]),
            self.traffic[DOWNLOAD].saturating_sub(self.last_traffic[DOWNLOAD]),
        )
    }

    pub fn pending_bytes(&self) -> u64 {
        let (upload, download) = self.diff();
        upload.saturating_add(download)
    }

    /// Decide whether the pending delta should be reported now.
    ///
    /// Reports when the pending delta reaches the threshold; otherwise halves
    /// the threshold, clamped to the floor. The caller resets the account once
    /// the report has been delivered.
    pub fn needs_report(&mut self) -> bool {
        if self.pending_bytes() >= self.threshold {
            return true;
        }
        self.threshold = (self.threshold / 2).max(self.sensitivity.floor);
        false
    }

    /// Advance the baseline to the current counters and restore the ceiling.
    pub fn reset(&mut self) {
        self.last_traffic = self.traffic;
        self.threshold = self.sensitivity.ceiling;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.reset();
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.reset();
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            user_id: self.user.id,
            credential: self.user.credential.clone(),
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user.id)
    }
}
