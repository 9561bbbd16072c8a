use thiserror::Error;

/// Failures reported by a lock store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write precondition did not hold: the document already exists, or its
    /// version no longer matches.
    #[error("conditional write rejected for '{0}'")]
    Conflict(String),

    #[error("document '{0}' not found")]
    NotFound(String),

    /// Transient backend failure (throttling, dispatch errors) that may succeed later.
    #[error("retryable store failure: {0}")]
    Retryable(String),

    #[error("store failure: {0}")]
    NonRetryable(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Retryable(_))
    }
}

/// Failures surfaced to callers of the locker.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out waiting for lock '{0}'")]
    Timeout(String),

    /// The held version was superseded; the critical section is no longer protected.
    #[error("lock '{0}' was lost to another holder")]
    LockLost(String),

    #[error("lock '{0}' is not held")]
    NotHeld(String),

    #[error("acquisition of lock '{0}' was cancelled")]
    Cancelled(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
