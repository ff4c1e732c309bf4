use std::time::Duration;

use thiserror::Error;

use crate::timeout::TimeoutScope;

/// Core error taxonomy.
///
/// Retry guidance:
/// - `Timeout` leaves the manager intact; the caller may retry per its own policy.
/// - `Cancelled` means shutdown was requested; do not retry, unwind.
/// - `DuplicateItem` / `ConcurrencyChange` are caller errors, never auto-retried.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("item id={0} is already waiting or running")]
    DuplicateItem(String),

    #[error("cannot change max concurrency while items are active (waiting={waiting}, running={running})")]
    ConcurrencyChange { waiting: usize, running: usize },

    #[error("{scope} scope timed out after {limit:?}")]
    Timeout { scope: TimeoutScope, limit: Duration },

    #[error("operation cancelled by shutdown")]
    Cancelled,
}

impl ConductorError {
    /// Timeouts are the only retryable variant.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConductorError::Timeout { .. })
    }
}
