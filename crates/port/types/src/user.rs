//! User records as delivered by the authoritative user source

use crate::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Opaque routing credential pushed to the live proxy.
///
/// Two records with the same id but different credentials require the old
/// credential to be revoked before the new one is provisioned.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

// Credentials end up in log fields; only a short prefix is ever printed.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix: String = self.0.chars().take(4).collect();
        write!(f, "Credential({}…)", prefix)
    }
}

/// A user as seen by the central source of truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable user identifier
    pub id: UserId,

    /// Current routing credential
    pub credential: Credential,

    /// Remaining balance in bytes
    #[serde(default)]
    pub balance: i64,

    /// Tags used to match users to nodes
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl UserRecord {
    pub fn new(id: impl Into<UserId>, credential: Credential) -> Self {
        Self {
            id: id.into(),
            credential,
            balance: 0,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("0f8e3b1c-aaaa-bbbb-cccc-dddddddddddd");
        let printed = format!("{:?}", credential);
        assert!(printed.starts_with("Credential(0f8e"));
        assert!(!printed.contains("dddd"));
    }

    #[test]
    fn test_user_record_deserialize_defaults() {
        let record: UserRecord =
            serde_json::from_str(r#"{"id": 7, "credential": "abc"}"#).unwrap();
        assert_eq!(record.id, UserId::new(7));
        assert_eq!(record.balance, 0);
        assert!(record.tags.is_empty());
    }
}
