//! The local account map and user reconciliation.
//!
//! The ledger owns every [`Account`] the node has ever served. Accounts are
//! disabled rather than dropped when their user disappears, so their history
//! survives a later re-enable and traffic seen while disabled can be caught.

use std::collections::{HashMap, HashSet};

use port_types::{TrafficSample, UserId, UserRecord};
use tracing::{debug, info, warn};

use crate::account::{Account, AccountSnapshot, Sensitivity};
use crate::error::{AccountingError, AccountingResult};

/// Outcome of reconciling the ledger against a fetched user set.
///
/// Revocations in `removed` must reach the proxy before provisions in
/// `added`, so an id never has two live credentials at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileDiff {
    /// Accounts to provision, with their current credential.
    pub added: Vec<AccountSnapshot>,

    /// Ids whose credential changed; each appears once in `added` and once in `removed`.
    pub altered: Vec<UserId>,

    /// Ids whose account was created by this reconciliation. Their first
    /// counter reading is a baseline, not a delta.
    pub created: Vec<UserId>,

    /// Credentials to revoke. For altered ids this is the old credential.
    pub removed: Vec<AccountSnapshot>,
}

impl ReconcileDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Ids that end the cycle disabled: removed and not re-provisioned.
    pub fn to_disable(&self) -> Vec<UserId> {
        let provisioned: HashSet<UserId> = self.added.iter().map(|s| s.user_id).collect();
        self.removed
            .iter()
            .map(|s| s.user_id)
            .filter(|id| !provisioned.contains(id))
            .collect()
    }

    /// Ids touched by this diff in either direction.
    pub fn touched(&self) -> HashSet<UserId> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .map(|s| s.user_id)
            .collect()
    }
}

/// Result of applying one traffic sample to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// No account exists for the sampled id.
    UnknownUser,

    /// No counter moved.
    Unchanged,

    /// At least one counter increased.
    Increased { enabled: bool },
}

/// Local account map keyed by user id.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    accounts: HashMap<UserId, Account>,
    sensitivity: Sensitivity,
}

impl Ledger {
    pub fn new(sensitivity: Sensitivity) -> Self {
        Self {
            accounts: HashMap::new(),
            sensitivity,
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.accounts.values().filter(|a| a.is_enabled()).count()
    }

    pub fn get(&self, id: &UserId) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn get_mut(&mut self, id: &UserId) -> Option<&mut Account> {
        self.accounts.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Account> {
        self.accounts.values_mut()
    }

    /// Whether [`Ledger::reconcile`] would produce a non-empty diff for
    /// `fetched`, without touching any account.
    pub fn has_changes(&self, fetched: &[UserRecord]) -> bool {
        let mut seen = HashSet::with_capacity(fetched.len());
        for user in fetched {
            seen.insert(user.id);
            match self.accounts.get(&user.id) {
                Some(account)
                    if account.is_enabled() && account.credential() == &user.credential => {}
                _ => return true,
            }
        }
        self.accounts
            .values()
            .any(|account| account.is_enabled() && !seen.contains(&account.user_id()))
    }

    /// Diff the fetched authoritative users against local state.
    ///
    /// Creates accounts for new ids, swaps user records on credential
    /// rotation, and marks missing enabled accounts for revocation. Enable and
    /// disable toggles are left to [`Ledger::apply_toggles`] so the caller can
    /// settle pending traffic first.
    ///
    /// Only `UserRecord::credential` decides whether an existing account needs
    /// re-provisioning; balance and tag changes are refreshed silently.
    pub fn reconcile(&mut self, fetched: Vec<UserRecord>) -> AccountingResult<ReconcileDiff> {
        let mut seen = HashSet::with_capacity(fetched.len());
        for user in &fetched {
            if !seen.insert(user.id) {
                return Err(AccountingError::DuplicateUser(user.id));
            }
        }

        let mut diff = ReconcileDiff::default();
        let mut missing: HashSet<UserId> = self.accounts.keys().copied().collect();

        for user in fetched {
            missing.remove(&user.id);
            let sensitivity = self.sensitivity;

            match self.accounts.get_mut(&user.id) {
                None => {
                    debug!(user_id = %user.id, "New user");
                    let account = Account::with_sensitivity(user, sensitivity);
                    diff.added.push(account.snapshot());
                    diff.created.push(account.user_id());
                    self.accounts.insert(account.user_id(), account);
                }
                Some(account) if !account.is_enabled() => {
                    info!(user_id = %user.id, "User is going to be re-enabled");
                    account.replace_user(user);
                    diff.added.push(account.snapshot());
                }
                Some(account) if account.credential() != &user.credential => {
                    info!(user_id = %user.id, "User credential changed");
                    diff.removed.push(account.snapshot());
                    diff.altered.push(user.id);
                    account.replace_user(user);
                    diff.added.push(account.snapshot());
                }
                Some(account) => {
                    account.replace_user(user);
                }
            }
        }

        for id in missing {
            if let Some(account) = self.accounts.get(&id) {
                if account.is_enabled() {
                    info!(user_id = %id, "User is going to be disabled");
                    diff.removed.push(account.snapshot());
                }
            }
        }

        if !diff.is_empty() {
            warn!(
                added = diff.added.len() - diff.altered.len(),
                changed = diff.altered.len(),
                removed = diff.removed.len() - diff.altered.len(),
                "User set changed"
            );
        }

        Ok(diff)
    }

    /// Turn a diff into a full shutdown: revoke every enabled account and
    /// provision nothing. Old credentials already queued in `diff` are kept.
    pub fn revoke_all(&self, diff: ReconcileDiff) -> ReconcileDiff {
        let mut removed = diff.removed;
        let queued: HashSet<(UserId, String)> = removed
            .iter()
            .map(|s| (s.user_id, s.credential.expose().to_string()))
            .collect();

        for account in self.accounts.values().filter(|a| a.is_enabled()) {
            let snapshot = account.snapshot();
            if !queued.contains(&(snapshot.user_id, snapshot.credential.expose().to_string())) {
                removed.push(snapshot);
            }
        }

        ReconcileDiff {
            added: Vec::new(),
            altered: Vec::new(),
            created: diff.created,
            removed,
        }
    }

    /// Enable provisioned accounts and disable revoked ones.
    pub fn apply_toggles(&mut self, diff: &ReconcileDiff) {
        for snapshot in &diff.added {
            if let Some(account) = self.accounts.get_mut(&snapshot.user_id) {
                account.enable();
            }
        }
        for id in diff.to_disable() {
            if let Some(account) = self.accounts.get_mut(&id) {
                account.disable();
            }
        }
    }

    /// Feed one counter reading into the matching account.
    pub fn apply_sample(&mut self, sample: &TrafficSample) -> SampleOutcome {
        match self.accounts.get_mut(&sample.user_id) {
            None => SampleOutcome::UnknownUser,
            Some(account) => {
                if account.update_traffic(sample.upload, sample.download) {
                    SampleOutcome::Increased {
                        enabled: account.is_enabled(),
                    }
                } else {
                    SampleOutcome::Unchanged
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use port_types::Credential;
    use proptest::prelude::*;

    fn user(id: i64, credential: &str) -> UserRecord {
        UserRecord::new(id, Credential::new(credential))
    }

    fn ids(snapshots: &[AccountSnapshot]) -> Vec<i64> {
        let mut ids: Vec<i64> = snapshots.iter().map(|s| s.user_id.get()).collect();
        ids.sort_unstable();
        ids
    }

    fn seeded(users: Vec<UserRecord>) -> Ledger {
        let mut ledger = Ledger::default();
        let diff = ledger.reconcile(users).unwrap();
        ledger.apply_toggles(&diff);
        ledger
    }

    #[test]
    fn test_new_users_are_added() {
        let mut ledger = Ledger::default();
        let diff = ledger.reconcile(vec![user(1, "a"), user(2, "b")]).unwrap();

        assert_eq!(ids(&diff.added), vec![1, 2]);
        assert_eq!(diff.created.len(), 2);
        assert!(diff.removed.is_empty());
        assert_eq!(ledger.len(), 2);
        assert!(ledger.get(&UserId::new(1)).unwrap().is_enabled());
    }

    #[test]
    fn test_unchanged_user_produces_nothing() {
        let mut ledger = seeded(vec![user(1, "a")]);
        let diff = ledger.reconcile(vec![user(1, "a").with_balance(5000)]).unwrap();

        assert!(diff.is_empty());
        assert_eq!(ledger.get(&UserId::new(1)).unwrap().user().balance, 5000);
    }

    #[test]
    fn test_credential_change_revokes_old_and_provisions_new() {
        let mut ledger = seeded(vec![user(1, "x")]);
        ledger
            .get_mut(&UserId::new(1))
            .unwrap()
            .update_traffic(Some(4096), None);

        let diff = ledger.reconcile(vec![user(1, "y")]).unwrap();

        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].credential, Credential::new("y"));
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].credential, Credential::new("x"));
        assert_eq!(diff.altered, vec![UserId::new(1)]);
        assert!(diff.created.is_empty());
        assert!(diff.to_disable().is_empty());

        // Same account object: traffic history preserved.
        let account = ledger.get(&UserId::new(1)).unwrap();
        assert_eq!(account.traffic(), (4096, 0));
        assert_eq!(account.credential(), &Credential::new("y"));
    }

    #[test]
    fn test_missing_user_is_disabled_not_dropped() {
        let mut ledger = seeded(vec![user(1, "a"), user(2, "b")]);
        let diff = ledger.reconcile(vec![user(1, "a")]).unwrap();

        assert!(diff.added.is_empty());
        assert_eq!(ids(&diff.removed), vec![2]);
        assert_eq!(diff.to_disable(), vec![UserId::new(2)]);

        ledger.apply_toggles(&diff);
        assert_eq!(ledger.len(), 2);
        assert!(!ledger.get(&UserId::new(2)).unwrap().is_enabled());

        // Already disabled and still missing: nothing more to do.
        let again = ledger.reconcile(vec![user(1, "a")]).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_returning_user_is_re_enabled_with_history() {
        let mut ledger = seeded(vec![user(1, "a")]);
        ledger
            .get_mut(&UserId::new(1))
            .unwrap()
            .update_traffic(Some(10), Some(10));
        let diff = ledger.reconcile(vec![]).unwrap();
        ledger.apply_toggles(&diff);

        let diff = ledger.reconcile(vec![user(1, "b")]).unwrap();
        assert_eq!(ids(&diff.added), vec![1]);
        assert!(diff.created.is_empty());
        assert_eq!(diff.added[0].credential, Credential::new("b"));
        assert!(diff.removed.is_empty());

        ledger.apply_toggles(&diff);
        let account = ledger.get(&UserId::new(1)).unwrap();
        assert!(account.is_enabled());
        assert_eq!(account.traffic(), (10, 10));
    }

    #[test]
    fn test_duplicate_ids_rejected_without_mutation() {
        let mut ledger = Ledger::default();
        let err = ledger
            .reconcile(vec![user(1, "a"), user(2, "b"), user(1, "c")])
            .unwrap_err();
        assert_eq!(err, AccountingError::DuplicateUser(UserId::new(1)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_revoke_all_keeps_old_credentials() {
        let mut ledger = seeded(vec![user(1, "x"), user(2, "b")]);
        let diff = ledger.reconcile(vec![user(1, "y"), user(2, "b")]).unwrap();
        let shutdown = ledger.revoke_all(diff);

        assert!(shutdown.added.is_empty());
        let mut credentials: Vec<&str> = shutdown
            .removed
            .iter()
            .map(|s| s.credential.expose())
            .collect();
        credentials.sort_unstable();
        assert_eq!(credentials, vec!["b", "x", "y"]);

        ledger.apply_toggles(&shutdown);
        assert_eq!(ledger.enabled_count(), 0);
    }

    #[test]
    fn test_has_changes_matches_reconcile() {
        let ledger = seeded(vec![user(1, "a"), user(2, "b")]);

        assert!(!ledger.has_changes(&[user(1, "a"), user(2, "b").with_balance(7)]));
        assert!(ledger.has_changes(&[user(1, "a")]));
        assert!(ledger.has_changes(&[user(1, "a"), user(2, "c")]));
        assert!(ledger.has_changes(&[user(1, "a"), user(2, "b"), user(3, "c")]));

        let mut ledger = ledger;
        let diff = ledger.reconcile(vec![user(1, "a")]).unwrap();
        ledger.apply_toggles(&diff);
        assert!(!ledger.has_changes(&[user(1, "a")]));
        assert!(ledger.has_changes(&[user(1, "a"), user(2, "b")]));
    }

    #[test]
    fn test_apply_sample_reports_disabled_activity() {
        let mut ledger = seeded(vec![user(1, "a")]);
        let diff = ledger.reconcile(vec![]).unwrap();
        ledger.apply_toggles(&diff);

        let sample = TrafficSample::new(UserId::new(1), Some(100), None);
        assert_eq!(
            ledger.apply_sample(&sample),
            SampleOutcome::Increased { enabled: false }
        );
        assert_eq!(ledger.apply_sample(&sample), SampleOutcome::Unchanged);

        let stranger = TrafficSample::new(UserId::new(9), Some(1), None);
        assert_eq!(ledger.apply_sample(&stranger), SampleOutcome::UnknownUser);
    }

    proptest! {
        #[test]
        fn diff_partitions_changed_ids(
            local in prop::collection::btree_map(0i64..40, 0u8..3, 0..20),
            fetched in prop::collection::btree_map(0i64..40, 0u8..3, 0..20),
        ) {
            let mut ledger = seeded(
                local.iter().map(|(id, c)| user(*id, &c.to_string())).collect(),
            );
            let fetched_users: Vec<UserRecord> =
                fetched.iter().map(|(id, c)| user(*id, &c.to_string())).collect();
            let predicted = ledger.has_changes(&fetched_users);
            let diff = ledger.reconcile(fetched_users).unwrap();
            prop_assert_eq!(predicted, !diff.is_empty());

            let added: Vec<i64> = ids(&diff.added);
            let removed: Vec<i64> = ids(&diff.removed);

            let mut expected_added = Vec::new();
            let mut expected_removed = Vec::new();
            for (id, credential) in &fetched {
                match local.get(id) {
                    None => expected_added.push(*id),
                    Some(old) if old != credential => {
                        expected_added.push(*id);
                        expected_removed.push(*id);
                    }
                    Some(_) => {}
                }
            }
            for id in local.keys() {
                if !fetched.contains_key(id) {
                    expected_removed.push(*id);
                }
            }
            expected_removed.sort_unstable();

            prop_assert_eq!(added, expected_added);
            prop_assert_eq!(removed, expected_removed);
        }
    }
}
