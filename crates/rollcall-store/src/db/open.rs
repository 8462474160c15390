use super::migrations::apply_migrations;
use crate::error::StoreResult;
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Open (creating if needed) a database file and apply pending migrations.
pub fn open_db(path: impl AsRef<Path>) -> StoreResult<Connection> {
    let path = path.as_ref();
    let started = Instant::now();

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut conn = Connection::open(path).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to open database");
        e
    })?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
    bootstrap_connection(&mut conn)?;

    tracing::info!(
        path = %path.display(),
        duration_ms = started.elapsed().as_millis() as u64,
        "database opened"
    );
    Ok(conn)
}

/// Open an in-memory database with all migrations applied.
pub fn open_db_in_memory() -> StoreResult<Connection> {
    let mut conn = Connection::open_in_memory()?;
    bootstrap_connection(&mut conn)?;
    tracing::debug!("in-memory database opened");
    Ok(conn)
}

fn bootstrap_connection(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}
