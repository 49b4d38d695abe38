//! Error types for port-daemon

use port_accounting::AccountingError;
use port_cron::CronError;
use thiserror::Error;

/// Failure of an external collaborator (proxy, user source, spool, gauge).
#[derive(Debug, Error)]
pub enum SourceError {
    /// I/O failure talking to the collaborator
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The collaborator answered with something we cannot use
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Stored data could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The collaborator is not reachable right now
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Result type for collaborator calls
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Failure of one sync cycle
#[derive(Debug, Error)]
pub enum AgentError {
    /// Reconciliation rejected the fetched users
    #[error("Accounting error: {0}")]
    Accounting(#[from] AccountingError),

    /// A collaborator call failed
    #[error("{action} failed: {source}")]
    Source {
        action: &'static str,
        #[source]
        source: SourceError,
    },
}

impl AgentError {
    /// Tag a collaborator failure with the action that hit it.
    pub fn during(action: &'static str) -> impl FnOnce(SourceError) -> Self {
        move |source| Self::Source { action, source }
    }
}

/// Result type for agent operations
pub type AgentResult<T> = std::result::Result<T, AgentError>;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Collaborator failure during startup
    #[error("Startup error: {0}")]
    Source(#[from] SourceError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] CronError),

    /// Invalid accounting settings
    #[error("Accounting error: {0}")]
    Accounting(#[from] AccountingError),
}

impl From<config::ConfigError> for DaemonError {
    fn from(e: config::ConfigError) -> Self {
        DaemonError::Config(e.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = std::result::Result<T, DaemonError>;
