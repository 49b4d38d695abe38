//! Error types for port-accounting crate.

use port_types::UserId;
use thiserror::Error;

/// Errors raised while maintaining the local account state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountingError {
    /// The user source returned the same id twice in one fetch.
    #[error("duplicate user in fetched set: {0}")]
    DuplicateUser(UserId),

    /// Sensitivity bounds are unusable.
    #[error("invalid sensitivity: floor {floor} must be positive and not exceed ceiling {ceiling}")]
    InvalidSensitivity { floor: u64, ceiling: u64 },
}

/// Result type for accounting operations.
pub type AccountingResult<T> = Result<T, AccountingError>;
