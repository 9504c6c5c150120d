//! `SQLite` store for review facts and the shared-reviewer graph.
//!
//! Runtime defaults are conservative:
//! - `journal_mode = WAL` to allow readers while the aggregator writes
//! - `busy_timeout = 5s` to absorb transient lock failures under contention
//! - `synchronous = NORMAL`, which keeps committed units durable across a
//!   process crash in WAL mode

pub mod facts;
pub mod migrations;
pub mod pairs;
pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::StoreError;
use crate::model::ReviewerId;

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// An open, migrated steamgraph store.
///
/// A single connection serves both as the read-only fact source and as the
/// transactional pair sink.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the store at `path`, apply runtime pragmas, and
    /// migrate the schema to the latest version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the file cannot be opened or
    /// configured, or [`StoreError::Migration`] if a migration fails.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let unavailable = |source| StoreError::Unavailable {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path).map_err(unavailable)?;
        configure_connection(&conn, busy_timeout).map_err(unavailable)?;
        migrations::migrate(&mut conn)
            .map_err(|(version, source)| StoreError::Migration { version, source })?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open a private in-memory store. Used by tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let path = PathBuf::from(":memory:");
        let mut conn = Connection::open_in_memory().map_err(|source| StoreError::Unavailable {
            path: path.clone(),
            source,
        })?;
        migrations::migrate(&mut conn)
            .map_err(|(version, source)| StoreError::Migration { version, source })?;
        Ok(Self { conn, path })
    }

    /// Open the store only if the file already exists and its metadata row
    /// is readable. Returns `Ok(None)` for a missing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened or migrated.
    pub fn try_open(path: &Path, busy_timeout: Duration) -> Result<Option<Self>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }

        let store = Self::open(path, busy_timeout)?;
        store.meta().map_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "store metadata unreadable");
            e
        })?;
        Ok(Some(store))
    }

    /// Borrow the underlying connection.
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Path this store was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the single `store_meta` row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is missing or unreadable.
    pub fn meta(&self) -> Result<StoreMeta, StoreError> {
        let meta = self.conn.query_row(
            "SELECT schema_version, last_run_at_us, last_checkpointed_reviewer
             FROM store_meta WHERE id = 1",
            [],
            |row| {
                Ok(StoreMeta {
                    schema_version: row.get(0)?,
                    last_run_at_us: row.get(1)?,
                    last_checkpointed_reviewer: row.get::<_, Option<i64>>(2)?.map(ReviewerId),
                })
            },
        )?;
        Ok(meta)
    }

    /// Stamp the end of an aggregation run.
    ///
    /// The resume point is not touched here; it is written with each
    /// checkpoint by [`pairs::mark_checkpointed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn record_run(&self) -> Result<(), StoreError> {
        let now_us = chrono::Utc::now().timestamp_micros();
        self.conn.execute(
            "UPDATE store_meta SET last_run_at_us = ?1 WHERE id = 1",
            [now_us],
        )?;
        Ok(())
    }
}

/// Contents of the `store_meta` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreMeta {
    pub schema_version: i64,
    pub last_run_at_us: i64,
    pub last_checkpointed_reviewer: Option<ReviewerId>,
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

/// Convert a stored count into `u64`, rejecting negatives.
pub(crate) fn count_from_sql(column: &'static str, value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::OutOfRange { column, value })
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUSY_TIMEOUT, SqliteStore};
    use crate::db::migrations;
    use crate::error::StoreError;
    use crate::model::ReviewerId;
    use tempfile::TempDir;

    fn temp_db_path() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("steamgraph.db");
        (dir, path)
    }

    #[test]
    fn open_sets_wal_and_busy_timeout() {
        let (_dir, path) = temp_db_path();
        let store = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("open store");

        let journal_mode: String = store
            .conn()
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .expect("query journal_mode");
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 = store
            .conn()
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .expect("query busy_timeout");
        assert_eq!(
            u128::from(busy_timeout_ms),
            DEFAULT_BUSY_TIMEOUT.as_millis()
        );
    }

    #[test]
    fn open_runs_migrations() {
        let (_dir, path) = temp_db_path();
        let store = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("open store");

        let version = migrations::current_schema_version(store.conn()).expect("schema version");
        assert_eq!(version, migrations::LATEST_SCHEMA_VERSION);

        let meta = store.meta().expect("meta row");
        assert_eq!(meta.schema_version, i64::from(migrations::LATEST_SCHEMA_VERSION));
        assert_eq!(meta.last_run_at_us, 0);
        assert!(meta.last_checkpointed_reviewer.is_none());
    }

    #[test]
    fn try_open_missing_returns_none() {
        let (_dir, path) = temp_db_path();
        let store = SqliteStore::try_open(&path, DEFAULT_BUSY_TIMEOUT).expect("no error");
        assert!(store.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn open_directory_path_is_unavailable() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let err = SqliteStore::open(dir.path(), DEFAULT_BUSY_TIMEOUT).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn record_run_stamps_time_and_keeps_resume_point() {
        let store = SqliteStore::open_in_memory().expect("open store");
        crate::db::pairs::mark_checkpointed(store.conn(), ReviewerId(42), 0).expect("claim");

        store.record_run().expect("record run");

        let meta = store.meta().expect("meta row");
        assert_eq!(meta.last_checkpointed_reviewer, Some(ReviewerId(42)));
        assert!(meta.last_run_at_us > 0);
    }
}
