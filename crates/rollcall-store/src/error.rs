use rollcall_core::{StudentKey, ValidationError};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion { db_version: u32, latest_supported: u32 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("student {0} is already registered")]
    AlreadyRegistered(StudentKey),
    #[error("student {0} not found")]
    NotFound(StudentKey),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// True for a UNIQUE / PRIMARY KEY constraint failure.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
