use thiserror::Error;

use crate::error::ErrorKind;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("row not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database busy")]
    Busy,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Conflict(_) => ErrorKind::ConstraintViolation,
            StorageError::Busy => ErrorKind::StorageBusy,
            StorageError::Sqlite(e) => classify_sqlite(e),
            StorageError::Serialization(_) | StorageError::InvalidData(_) => {
                ErrorKind::Validation
            }
            StorageError::Io(_) => ErrorKind::Internal,
        }
    }
}

fn classify_sqlite(e: &rusqlite::Error) -> ErrorKind {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(err, _) = e {
        return match err.code {
            ErrorCode::ConstraintViolation => ErrorKind::ConstraintViolation,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorKind::StorageBusy,
            _ => ErrorKind::Internal,
        };
    }
    ErrorKind::Internal
}

/// Translate a raw constraint-violation `rusqlite::Error` that is known to
/// come from a UNIQUE index into a semantic `Conflict`, carrying the
/// conflicting key so callers can distinguish "already installed" from a
/// generic failure, per the storage-layer propagation policy.
pub fn translate_unique_violation(err: rusqlite::Error, conflicting_key: &str) -> StorageError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ffi::ErrorCode::ConstraintViolation =>
        {
            StorageError::Conflict(conflicting_key.to_string())
        }
        _ => StorageError::Sqlite(err),
    }
}
