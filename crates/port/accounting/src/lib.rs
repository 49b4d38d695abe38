//! # Port Accounting - Traffic accounting and user reconciliation
//!
//! This crate holds the agent's local view of the users served by a node.
//!
//! ## Key Components
//!
//! - [`Account`]: Per-user traffic counters with an adaptive report threshold
//! - [`Ledger`]: The local account map and the reconciliation algorithm that
//!   diffs it against a freshly fetched authoritative user set
//! - [`EligibilityPolicy`]: Which fetched users this node should serve at all
//!
//! ## Threshold decay
//!
//! An account reports once its unreported delta reaches the current
//! threshold. Every check that does not report halves the threshold down to a
//! fixed floor, so a slowly growing account is still reported within a bounded
//! number of cycles while busy accounts are not reported on every tick.

pub mod account;
pub mod eligibility;
pub mod error;
pub mod ledger;

pub use account::{Account, AccountSnapshot, Sensitivity};
pub use eligibility::EligibilityPolicy;
pub use error::{AccountingError, AccountingResult};
pub use ledger::{Ledger, ReconcileDiff, SampleOutcome};
