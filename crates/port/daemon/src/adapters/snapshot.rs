//! User and node source backed by a JSON document on disk.
//!
//! The document is re-read on every call, so whatever process publishes it
//! can replace it atomically between cycles.

use std::path::PathBuf;

use async_trait::async_trait;
use port_types::{NodeId, NodeProfile, UserRecord};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborators::{NodeSource, UserSource};
use crate::error::SourceResult;

/// On-disk layout of the snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub nodes: Vec<NodeProfile>,
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> SourceResult<Snapshot> {
        let raw = tokio::fs::read(&self.path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)?;
        debug!(
            path = %self.path.display(),
            nodes = snapshot.nodes.len(),
            users = snapshot.users.len(),
            "Loaded snapshot"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl UserSource for SnapshotFile {
    async fn fetch_eligible_users(&self) -> SourceResult<Vec<UserRecord>> {
        Ok(self.load().await?.users)
    }
}

#[async_trait]
impl NodeSource for SnapshotFile {
    async fn fetch_node(&self, id: &NodeId) -> SourceResult<Option<NodeProfile>> {
        Ok(self
            .load()
            .await?
            .nodes
            .into_iter()
            .find(|node| &node.id == id))
    }
}
