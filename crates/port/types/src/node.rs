//! Node profile types

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Weight at or below which a node is treated as free of charge
pub const FREE_NODE_WEIGHT: f64 = 1e-3;

/// Identity and scheduling attributes of a node in the fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    /// Node identifier
    pub id: NodeId,

    /// Human-readable node name
    #[serde(default)]
    pub name: String,

    /// Tags restricting which users may use this node
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Billing weight; free nodes do not check balances
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Free-form feature flags (e.g. `restart`)
    #[serde(default)]
    pub properties: BTreeSet<String>,
}

fn default_weight() -> f64 {
    1.0
}

impl NodeProfile {
    pub fn new(id: NodeId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            tags: BTreeSet::new(),
            weight: default_weight(),
            properties: BTreeSet::new(),
        }
    }

    /// Free nodes skip the balance check.
    pub fn is_free(&self) -> bool {
        self.weight <= FREE_NODE_WEIGHT
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties.contains(property)
    }

    /// A node without tags accepts everybody; otherwise the tag sets must intersect.
    pub fn can_be_used_by(&self, user_tags: &BTreeSet<String>) -> bool {
        self.tags.is_empty() || !self.tags.is_disjoint(user_tags)
    }

    /// Whether `other` differs in any attribute that requires a restart to pick up.
    pub fn differs_from(&self, other: &NodeProfile) -> bool {
        self.tags != other.tags
            || (self.weight - other.weight).abs() > f64::EPSILON
            || self.properties != other.properties
    }
}
