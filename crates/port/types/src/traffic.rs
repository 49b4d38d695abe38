//! Traffic counter readings and upload records

use crate::{NodeId, UserId};
use serde::{Deserialize, Serialize};

/// Traffic direction as seen from the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// A cumulative counter reading for one user.
///
/// Either direction may be absent when the proxy only reported one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub user_id: UserId,
    pub upload: Option<u64>,
    pub download: Option<u64>,
}

impl TrafficSample {
    pub fn new(user_id: UserId, upload: Option<u64>, download: Option<u64>) -> Self {
        Self {
            user_id,
            upload,
            download,
        }
    }

    pub fn single(user_id: UserId, direction: Direction, bytes: u64) -> Self {
        match direction {
            Direction::Upload => Self::new(user_id, Some(bytes), None),
            Direction::Download => Self::new(user_id, None, Some(bytes)),
        }
    }
}

/// One reported traffic delta, as written to the upload log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub user_id: UserId,
    pub node_id: NodeId,
    pub upload: u64,
    pub download: u64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
}

impl UploadRecord {
    pub fn total(&self) -> u64 {
        self.upload.saturating_add(self.download)
    }
}
