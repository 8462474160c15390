//! SQLite connection bootstrap and schema migrations.
//!
//! Connections returned from here have foreign keys enabled, a busy timeout
//! set, and every migration applied. Nothing reads or writes application
//! tables before that.

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};
