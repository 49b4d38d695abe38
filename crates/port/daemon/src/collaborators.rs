//! Capabilities the agent consumes.
//!
//! Every external system the agent talks to sits behind one of these traits:
//! the authoritative user store, the live proxy's counters and credential
//! table, the upload spool, and the active-user gauge. The concrete adapters
//! live in [`crate::adapters`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use port_accounting::AccountSnapshot;
use port_types::{NodeId, NodeProfile, TrafficSample, UploadRecord, UserRecord};

use crate::error::SourceResult;

/// Gauge value meaning "the last cycle ended in error".
pub const GAUGE_ERROR_SENTINEL: i64 = -1;

/// Authoritative user set.
#[async_trait]
pub trait UserSource: Send + Sync {
    /// Users that may be served by this node. Ids are unique; may be empty.
    async fn fetch_eligible_users(&self) -> SourceResult<Vec<UserRecord>>;
}

/// Authoritative node profiles.
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// The current profile of `id`, or `None` if the node was removed.
    async fn fetch_node(&self, id: &NodeId) -> SourceResult<Option<NodeProfile>>;
}

/// Cumulative per-user byte counters of the live proxy.
#[async_trait]
pub trait TrafficSource: Send + Sync {
    async fn fetch_counters(&self) -> SourceResult<Vec<TrafficSample>>;
}

/// The live proxy's credential table.
#[async_trait]
pub trait TrafficControl: Send + Sync {
    async fn apply_credential(&self, account: &AccountSnapshot) -> SourceResult<()>;

    async fn revoke_credential(&self, account: &AccountSnapshot) -> SourceResult<()>;
}

/// Durable destination for traffic deltas.
///
/// A successful return means the batch is safe; accounts are reset only then.
#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn emit(&self, batch: &[UploadRecord]) -> SourceResult<()>;
}

/// Side-channel count of active users, overwritten each cycle.
#[async_trait]
pub trait ActiveUserGauge: Send + Sync {
    async fn report(&self, count: i64) -> SourceResult<()>;
}
