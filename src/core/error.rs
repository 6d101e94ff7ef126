//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
///
/// Under-allocation is deliberately absent: it is a status carried on a
/// [`Schedule`](crate::core::Schedule), not a failure.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The stake feed could not be fetched or was rejected.
    #[error("registry refresh failed: {0}")]
    RegistryRefresh(String),
    /// A schedule or pool-info write did not reach the store.
    #[error("store persist failed: {0}")]
    StorePersist(String),
    /// A store read failed; propagated to the caller.
    #[error("store read failed: {0}")]
    StoreRead(String),
    /// An allocation broke an internal invariant and must not be persisted.
    #[error("policy violation: {0}")]
    PolicyViolation(String),
    /// An external call exceeded its configured bound.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Configured bound in milliseconds.
        timeout_ms: u64,
    },
    /// Caller supplied input that cannot be scheduled.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Configuration failed validation.
    #[error("config invalid: {0}")]
    Config(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

impl SchedulerError {
    /// Whether the scheduler loop should absorb this error and keep running.
    ///
    /// Store reads are the caller's concern and config errors are fatal at
    /// startup, so neither counts as recoverable here.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RegistryRefresh(_)
                | Self::StorePersist(_)
                | Self::PolicyViolation(_)
                | Self::Timeout { .. }
                | Self::Backend(_)
        )
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
