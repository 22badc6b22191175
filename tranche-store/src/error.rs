use rusqlite::ErrorCode;
use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer held the database lock for the entire retry budget.
    /// Callers should surface this as a retryable condition.
    #[error("store is busy; another writer holds the lock")]
    Busy,
    /// A sequence was incremented before `ensure` ran for it. Always a bug
    /// in the calling code, never retried.
    #[error("sequence '{0}' is not initialized")]
    SequenceNotInitialized(String),
    /// Sequence name outside the static configuration table.
    #[error("unknown sequence: {0}")]
    UnknownSequence(String),
    /// A stored value failed to parse back into its domain type.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
    /// Any other storage failure (constraint violations included). Rolled
    /// back once and propagated verbatim, never retried.
    #[error("storage rejected the operation: {0}")]
    Rejected(#[source] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for the transient contention condition the write coordinator
    /// retries on.
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        // Only the two lock-contention result codes are classified as
        // retryable. Treating anything wider (e.g. transient I/O) as busy
        // would mask real failures behind silent retries.
        if let rusqlite::Error::SqliteFailure(err, _) = &value {
            if err.code == ErrorCode::DatabaseBusy || err.code == ErrorCode::DatabaseLocked {
                return StoreError::Busy;
            }
        }
        StoreError::Rejected(value)
    }
}
