//! Pair counters and the reviewer checkpoint set.
//!
//! Writes here are only correct inside the per-reviewer transaction opened by
//! the aggregator; reads may run anywhere.

use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use super::count_from_sql;
use super::facts::{self, FactCounts};
use crate::error::StoreError;
use crate::model::{AppId, AppPair, ReviewerId};

/// Add `delta` to a pair's shared-reviewer count, inserting the row at
/// `delta` when absent.
///
/// # Errors
///
/// Returns an error if the upsert fails or `delta` does not fit in `i64`.
pub fn upsert_pair_increment(
    conn: &Connection,
    pair: AppPair,
    delta: u64,
) -> Result<(), StoreError> {
    let delta = i64::try_from(delta).map_err(|_| StoreError::OutOfRange {
        column: "shared_count",
        value: i64::MAX,
    })?;
    conn.prepare_cached(
        "INSERT INTO app_shared_reviewers (appid_low, appid_high, shared_count)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (appid_low, appid_high)
         DO UPDATE SET shared_count = shared_count + excluded.shared_count",
    )?
    .execute(params![pair.low().0, pair.high().0, delta])?;
    Ok(())
}

/// Whether a reviewer is in the checkpoint set.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn is_checkpointed(conn: &Connection, key: ReviewerId) -> Result<bool, StoreError> {
    let exists = conn
        .prepare_cached(
            "SELECT EXISTS(SELECT 1 FROM shared_reviewers_checkpoints WHERE reviewer_id = ?1)",
        )?
        .query_row([key.0], |row| row.get(0))?;
    Ok(exists)
}

/// Claim a reviewer in the checkpoint set and make it the store's resume
/// point.
///
/// Returns `false` when the reviewer was already present, in which case
/// nothing was written.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn mark_checkpointed(
    conn: &Connection,
    key: ReviewerId,
    pair_count: u64,
) -> Result<bool, StoreError> {
    let now_us = chrono::Utc::now().timestamp_micros();
    let changed = conn
        .prepare_cached(
            "INSERT INTO shared_reviewers_checkpoints (reviewer_id, pair_count, processed_at_us)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (reviewer_id) DO NOTHING",
        )?
        .execute(params![
            key.0,
            i64::try_from(pair_count).unwrap_or(i64::MAX),
            now_us
        ])?;
    if changed == 0 {
        return Ok(false);
    }
    conn.prepare_cached("UPDATE store_meta SET last_checkpointed_reviewer = ?1 WHERE id = 1")?
        .execute([key.0])?;
    Ok(true)
}

/// Every checkpointed reviewer, ascending.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn checkpointed_reviewers(conn: &Connection) -> Result<BTreeSet<ReviewerId>, StoreError> {
    let mut stmt = conn.prepare_cached("SELECT reviewer_id FROM shared_reviewers_checkpoints")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0).map(ReviewerId))?;
    Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
}

/// Number of checkpointed reviewers.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn checkpoint_count(conn: &Connection) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM shared_reviewers_checkpoints",
        [],
        |row| row.get(0),
    )?;
    count_from_sql("checkpoints", count)
}

/// A pair and the number of reviewers it shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PairCount {
    pub appid_low: AppId,
    pub appid_high: AppId,
    pub shared_count: u64,
}

/// An app sharing reviewers with a focal app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Partner {
    pub appid: AppId,
    pub shared_count: u64,
}

/// Shared-reviewer count for one pair, or `None` if they share nobody.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn shared_count(conn: &Connection, pair: AppPair) -> Result<Option<u64>, StoreError> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT shared_count FROM app_shared_reviewers
             WHERE appid_low = ?1 AND appid_high = ?2",
            params![pair.low().0, pair.high().0],
            |row| row.get(0),
        )
        .optional()?;
    count.map(|c| count_from_sql("shared_count", c)).transpose()
}

/// Apps sharing the most reviewers with `app`, by count descending then
/// appid ascending.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn top_partners(
    conn: &Connection,
    app: AppId,
    limit: usize,
) -> Result<Vec<Partner>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT partner, shared_count FROM (
             SELECT appid_high AS partner, shared_count
             FROM app_shared_reviewers WHERE appid_low = ?1
             UNION ALL
             SELECT appid_low AS partner, shared_count
             FROM app_shared_reviewers WHERE appid_high = ?1
         )
         ORDER BY shared_count DESC, partner ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![app.0, sql_limit(Some(limit))], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut partners = Vec::new();
    for row in rows {
        let (appid, count) = row?;
        partners.push(Partner {
            appid: AppId(appid),
            shared_count: count_from_sql("shared_count", count)?,
        });
    }
    Ok(partners)
}

/// Pairs by shared count descending, then canonical order. `None` returns
/// the whole table.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn top_pairs(conn: &Connection, limit: Option<usize>) -> Result<Vec<PairCount>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT appid_low, appid_high, shared_count
         FROM app_shared_reviewers
         ORDER BY shared_count DESC, appid_low ASC, appid_high ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map([sql_limit(limit)], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut pairs = Vec::new();
    for row in rows {
        let (low, high, count) = row?;
        pairs.push(PairCount {
            appid_low: AppId(low),
            appid_high: AppId(high),
            shared_count: count_from_sql("shared_count", count)?,
        });
    }
    Ok(pairs)
}

/// Number of pair counter rows.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn pair_row_count(conn: &Connection) -> Result<u64, StoreError> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM app_shared_reviewers", [], |row| row.get(0))?;
    count_from_sql("pairs", count)
}

// `LIMIT -1` means no limit in SQLite.
fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))
}

/// Rows removed by [`reset_aggregation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetStats {
    pub pairs_deleted: usize,
    pub checkpoints_deleted: usize,
}

/// Clear every pair counter and checkpoint in one transaction. Facts are not
/// touched.
///
/// # Errors
///
/// Returns an error if either delete fails; nothing is removed in that case.
pub fn reset_aggregation(conn: &Connection) -> Result<ResetStats, StoreError> {
    let tx = conn.unchecked_transaction()?;
    let pairs_deleted = tx.execute("DELETE FROM app_shared_reviewers", [])?;
    let checkpoints_deleted = tx.execute("DELETE FROM shared_reviewers_checkpoints", [])?;
    tx.execute(
        "UPDATE store_meta SET last_checkpointed_reviewer = NULL WHERE id = 1",
        [],
    )?;
    tx.commit()?;

    tracing::info!(pairs_deleted, checkpoints_deleted, "aggregation reset");
    Ok(ResetStats {
        pairs_deleted,
        checkpoints_deleted,
    })
}

/// Snapshot of the store for `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    #[serde(flatten)]
    pub facts: FactCounts,
    pub checkpointed_reviewers: u64,
    pub pending_reviewers: u64,
    pub pair_rows: u64,
}

/// Gather fact, checkpoint, and pair counts.
///
/// # Errors
///
/// Returns an error if any count query fails.
pub fn store_status(conn: &Connection) -> Result<StoreStatus, StoreError> {
    let facts = facts::fact_counts(conn)?;
    let pending: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT r.reviewer_id)
         FROM reviews r
         LEFT JOIN shared_reviewers_checkpoints c ON c.reviewer_id = r.reviewer_id
         WHERE c.reviewer_id IS NULL",
        [],
        |row| row.get(0),
    )?;

    Ok(StoreStatus {
        facts,
        checkpointed_reviewers: checkpoint_count(conn)?,
        pending_reviewers: count_from_sql("pending", pending)?,
        pair_rows: pair_row_count(conn)?,
    })
}
