use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShardError {
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),
    #[error("DuplicateUid: {0}")]
    DuplicateUid(String),
    #[error("InvalidState: {0}")]
    InvalidState(String),
    #[error("CorruptShard: {0}")]
    CorruptShard(String),
    #[error("UidNotFound: {0}")]
    UidNotFound(String),
    #[error("CorruptMetadata: {0}")]
    CorruptMetadata(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience alias for functions returning `ShardError`.
pub type ShardResult<T> = Result<T, ShardError>;
