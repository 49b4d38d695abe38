//! Process-wide state handed to the agent and its jobs at startup.

use std::sync::Arc;

use port_cron::Terminator;
use port_types::NodeProfile;

use crate::collaborators::ActiveUserGauge;

/// What every job on this node shares: who we are, how to restart, and
/// where the active-user count goes.
#[derive(Clone)]
pub struct NodeContext {
    /// Profile of this node as resolved at startup.
    pub node: NodeProfile,
    pub terminator: Arc<dyn Terminator>,
    pub gauge: Arc<dyn ActiveUserGauge>,
}

impl NodeContext {
    pub fn new(
        node: NodeProfile,
        terminator: Arc<dyn Terminator>,
        gauge: Arc<dyn ActiveUserGauge>,
    ) -> Self {
        Self {
            node,
            terminator,
            gauge,
        }
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}
