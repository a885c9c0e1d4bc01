//! Shared SQLite store handle for concurrent units of work.
//!
//! # Responsibility
//! - Migrate and configure a database file once, before any unit runs.
//! - Hand out independent connections, one per unit of work.
//!
//! # Invariants
//! - `rusqlite::Connection` is never shared across threads; each unit owns one.
//! - Every handed-out connection uses the store's lock-wait bound.

use super::open::{enable_wal, open_db_with_timeout, open_unit_connection};
use super::DbResult;
use log::info;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Source of fresh connections for `TransactionScope::New` units.
///
/// Implementations must be shareable across worker threads.
pub trait ConnectionSource: Send + Sync {
    fn connect(&self) -> DbResult<Connection>;
}

/// File-backed SQLite store shared by every creation unit.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Opens (and migrates) the database file at `path`.
    ///
    /// `busy_timeout` bounds how long a unit waits for the store write lock
    /// before failing with a busy error.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_db_with_timeout(&path, busy_timeout)?;
        enable_wal(&conn)?;
        drop(conn);

        info!(
            "event=store_open module=db status=ok busy_timeout_ms={}",
            busy_timeout.as_millis()
        );
        Ok(Self { path, busy_timeout })
    }
}

impl ConnectionSource for SqliteStore {
    fn connect(&self) -> DbResult<Connection> {
        open_unit_connection(&self.path, self.busy_timeout)
    }
}
