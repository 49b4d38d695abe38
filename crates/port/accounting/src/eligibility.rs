//! Which authoritative users a node should serve.

use std::collections::BTreeSet;

use port_types::{NodeProfile, UserRecord};
use serde::{Deserialize, Serialize};

/// Minimum balance in bytes a user needs on a paid node.
pub const DEFAULT_MIN_BALANCE: i64 = 1024;

/// Filters a raw user fetch down to the users this node serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityPolicy {
    /// Users at or below this balance are dropped on paid nodes.
    pub min_balance: i64,

    /// Free nodes skip the balance check.
    pub check_balance: bool,

    /// Node tags; empty accepts everybody.
    pub node_tags: BTreeSet<String>,
}

impl EligibilityPolicy {
    pub fn for_node(node: &NodeProfile, min_balance: i64) -> Self {
        Self {
            min_balance,
            check_balance: !node.is_free(),
            node_tags: node.tags.clone(),
        }
    }

    /// Accept every user.
    pub fn permissive() -> Self {
        Self {
            min_balance: 0,
            check_balance: false,
            node_tags: BTreeSet::new(),
        }
    }

    pub fn is_eligible(&self, user: &UserRecord) -> bool {
        if self.check_balance && user.balance <= self.min_balance {
            return false;
        }
        self.node_tags.is_empty() || !self.node_tags.is_disjoint(&user.tags)
    }

    pub fn filter(&self, users: Vec<UserRecord>) -> Vec<UserRecord> {
        users.into_iter().filter(|u| self.is_eligible(u)).collect()
    }
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}
