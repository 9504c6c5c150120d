//! `SQLite` schema migrations for the steamgraph store.

use super::schema;
use rusqlite::{Connection, types::Type};

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATIONS: &[(u32, &str)] = &[(1, schema::MIGRATION_V1_SQL), (2, schema::MIGRATION_V2_SQL)];

/// Read `PRAGMA user_version` and convert it to a Rust `u32`.
///
/// # Errors
///
/// Returns an error if querying `SQLite` fails or the version value cannot be
/// represented as `u32`.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply all pending migrations in ascending order.
///
/// Each migration runs in its own transaction and only when its version is
/// above `user_version`; the DDL itself uses `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns the failing version and its `SQLite` error. Earlier migrations stay
/// committed.
pub fn migrate(conn: &mut Connection) -> Result<u32, (u32, rusqlite::Error)> {
    let mut current = current_schema_version(conn).map_err(|e| (0, e))?;

    for &(version, sql) in MIGRATIONS {
        if version <= current {
            continue;
        }

        apply(conn, version, sql).map_err(|e| (version, e))?;
        tracing::debug!(version, "applied store migration");
        current = version;
    }

    Ok(current)
}

fn apply(conn: &mut Connection, version: u32, sql: &str) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", i64::from(version))?;
    tx.execute(
        "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
        [i64::from(version)],
    )?;
    tx.commit()
}
