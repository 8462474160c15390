//! rollcall-store: SQLite persistence for students and attendance.
//!
//! Uniqueness rules live in the schema as well as in code: one active
//! student per identity key, one attendance record per (student, date).

pub mod attendance;
pub mod db;
pub mod error;
pub mod students;

use std::path::PathBuf;

pub use attendance::{AttendanceStats, SqliteLedger};
pub use db::{open_db, open_db_in_memory};
pub use error::{StoreError, StoreResult};
pub use students::{NewStudent, StudentDirectory, StudentUpdate};

/// Default database location: `$XDG_DATA_HOME/rollcall/rollcall.db`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("rollcall.db")
}

pub(crate) fn parse_timestamp(raw: &str) -> StoreResult<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| StoreError::InvalidData(format!("timestamp '{raw}': {e}")))
}
