use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the cache index
#[derive(Error, Debug)]
pub enum CacheError {
    /// The caller broke the lock/load protocol (programmer error)
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Index file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Could not lock {}: {source}", path.display())]
    LockFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Invalid entry id: {0}")]
    InvalidEntryId(String),

    #[error("Invalid version id: {0}")]
    InvalidVersion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        CacheError::IllegalState(message.into())
    }
}

/// Result alias used throughout the library
pub type CacheResult<T> = Result<T, CacheError>;
