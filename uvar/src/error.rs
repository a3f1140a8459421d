use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for universal-variable store operations.
pub type UvarResult<T> = Result<T, UvarError>;

#[derive(Debug, Error)]
pub enum UvarError {
    #[error("failed to read universal variable store {path}: {source}")]
    ReadStore {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write universal variable store {path}: {source}")]
    WriteStore {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed record at line {line} of {path}: {source}")]
    ParseRecord {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },

    #[error("could not acquire lock {path} within {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: u32 },
}
