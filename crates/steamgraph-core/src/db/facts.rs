//! Review fact table: import and read paths.
//!
//! Facts arrive as newline-delimited JSON, one `(appid, reviewer_id)`
//! observation per line:
//!
//! ```text
//! {"appid": 440, "reviewer_id": 76561198000000001, "recommendation_id": 151925561}
//! {"appid": 570, "reviewer_id": 76561198000000001}
//! ```
//!
//! Re-importing the same observation is a no-op; the table is keyed on
//! `(reviewer_id, appid)`.

use std::collections::BTreeSet;
use std::io::BufRead;

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{AppId, ReviewerId};

/// One review observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFact {
    pub appid: AppId,
    pub reviewer_id: ReviewerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_id: Option<i64>,
}

impl ReviewFact {
    #[must_use]
    pub const fn new(reviewer_id: ReviewerId, appid: AppId) -> Self {
        Self {
            appid,
            reviewer_id,
            recommendation_id: None,
        }
    }
}

/// Counts returned after importing a batch of facts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// Facts newly written to the table.
    pub inserted: usize,
    /// Facts already present and skipped.
    pub duplicates: usize,
    /// Blank lines ignored.
    pub blank_lines: usize,
}

/// Insert one fact. Returns `true` when the row is new.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn insert_fact(conn: &Connection, fact: &ReviewFact) -> Result<bool, StoreError> {
    let now_us = chrono::Utc::now().timestamp_micros();
    let changed = conn
        .prepare_cached(
            "INSERT INTO reviews (reviewer_id, appid, recommendation_id, imported_at_us)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (reviewer_id, appid) DO NOTHING",
        )?
        .execute(params![
            fact.reviewer_id.0,
            fact.appid.0,
            fact.recommendation_id,
            now_us
        ])?;
    Ok(changed == 1)
}

/// Insert a slice of facts in one transaction.
///
/// # Errors
///
/// Returns an error if any insert fails; nothing from the slice is kept.
pub fn insert_facts(conn: &Connection, facts: &[ReviewFact]) -> Result<ImportStats, StoreError> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = ImportStats::default();
    for fact in facts {
        if insert_fact(&tx, fact)? {
            stats.inserted += 1;
        } else {
            stats.duplicates += 1;
        }
    }
    tx.commit()?;
    Ok(stats)
}

/// Parse newline-delimited JSON facts from `reader` and insert them in one
/// transaction.
///
/// A malformed line aborts the import with its 1-based line number and
/// nothing from this reader is committed.
///
/// # Errors
///
/// Returns [`StoreError::MalformedFact`] for a line that is not UTF-8 or not
/// a fact record, [`StoreError::Io`] if reading fails, or a `SQLite` error
/// from the insert.
pub fn import_jsonl(conn: &Connection, reader: impl BufRead) -> Result<ImportStats, StoreError> {
    let tx = conn.unchecked_transaction()?;
    let mut stats = ImportStats::default();

    for (idx, raw) in reader.split(b'\n').enumerate() {
        let raw = raw?;
        let line = std::str::from_utf8(&raw).map_err(|e| StoreError::MalformedFact {
            line: idx + 1,
            reason: format!("invalid UTF-8: {e}"),
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            stats.blank_lines += 1;
            continue;
        }

        let fact: ReviewFact =
            serde_json::from_str(trimmed).map_err(|e| StoreError::MalformedFact {
                line: idx + 1,
                reason: e.to_string(),
            })?;

        if insert_fact(&tx, &fact)? {
            stats.inserted += 1;
        } else {
            stats.duplicates += 1;
        }
    }

    tx.commit()?;
    tracing::debug!(
        inserted = stats.inserted,
        duplicates = stats.duplicates,
        "imported review facts"
    );
    Ok(stats)
}

/// Distinct reviewers present in the fact table, ascending.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn distinct_reviewers(conn: &Connection) -> Result<Vec<ReviewerId>, StoreError> {
    let mut stmt =
        conn.prepare_cached("SELECT DISTINCT reviewer_id FROM reviews ORDER BY reviewer_id")?;
    let rows = stmt.query_map([], |row| row.get::<_, i64>(0).map(ReviewerId))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Distinct apps a reviewer has reviewed.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn apps_for_reviewer(
    conn: &Connection,
    reviewer: ReviewerId,
) -> Result<BTreeSet<AppId>, StoreError> {
    let mut stmt = conn.prepare_cached("SELECT appid FROM reviews WHERE reviewer_id = ?1")?;
    let rows = stmt.query_map([reviewer.0], |row| row.get::<_, i64>(0).map(AppId))?;
    Ok(rows.collect::<Result<BTreeSet<_>, _>>()?)
}

/// Size of the fact table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FactCounts {
    pub facts: u64,
    pub reviewers: u64,
    pub apps: u64,
}

/// Count facts, distinct reviewers, and distinct apps.
///
/// # Errors
///
/// Returns an error if the query fails or a count is negative.
pub fn fact_counts(conn: &Connection) -> Result<FactCounts, StoreError> {
    let (facts, reviewers, apps): (i64, i64, i64) = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT reviewer_id), COUNT(DISTINCT appid) FROM reviews",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(FactCounts {
        facts: super::count_from_sql("facts", facts)?,
        reviewers: super::count_from_sql("reviewers", reviewers)?,
        apps: super::count_from_sql("apps", apps)?,
    })
}
