use des_shard::ShardError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),
    #[error("NotFound: {0}")]
    NotFound(String),
    #[error("Tombstoned: {0}")]
    Tombstoned(String),
    #[error("AlreadyDeleted: {0}")]
    AlreadyDeleted(String),
    #[error("ChecksumMismatch: {0}")]
    ChecksumMismatch(String),
    #[error("Transient: {0}")]
    Transient(String),
    #[error("Terminal: {0}")]
    Terminal(String),
    #[error(transparent)]
    Shard(#[from] ShardError),
    #[error("DatabaseError: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("ConnectionError: {0}")]
    Connection(#[from] diesel::result::ConnectionError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the operation is worth retrying with backoff.
    ///
    /// Semantic misses (404), auth failures and malformed data are
    /// terminal; only network/throttling-class faults retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// A convenience alias for functions returning `StoreError`.
pub type StoreResult<T> = Result<T, StoreError>;
