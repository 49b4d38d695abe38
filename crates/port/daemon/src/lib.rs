//! Port Daemon - per-node control plane agent
//!
//! This crate wires the accounting and scheduling crates to the outside world:
//! - Collaborator traits for the user source, proxy, upload spool, and gauge
//! - The [`Agent`] sync cycle: reconcile users, collect traffic, report deltas
//! - Node watch and daily restart jobs
//! - Concrete adapters and the daemon lifecycle behind `portd`

pub mod adapters;
pub mod agent;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod jobs;

pub use agent::{Agent, Collaborators, CycleReport, SyncSettings};
pub use collaborators::{
    ActiveUserGauge, NodeSource, TrafficControl, TrafficSource, UploadSink, UserSource,
    GAUGE_ERROR_SENTINEL,
};
pub use config::DaemonConfig;
pub use context::NodeContext;
pub use daemon::{build_scheduler, wait_for_node, Daemon};
pub use error::{AgentError, AgentResult, DaemonError, DaemonResult, SourceError, SourceResult};
pub use jobs::{NodeWatchTask, ScheduledRestartTask};
