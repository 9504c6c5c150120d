//! Checkpointed shared-reviewer aggregation.
//!
//! For each reviewer in the fact table, every unordered pair of apps that
//! reviewer reviewed gets its shared-reviewer counter bumped by one. The
//! reviewer is then recorded in the checkpoint set. Both steps commit in one
//! transaction, so a reviewer's contribution is either fully visible or
//! absent, and a rerun picks up exactly the reviewers that are missing.
//!
//! # Invariants
//!
//! - A checkpointed reviewer has had every one of its pairs counted exactly
//!   once.
//! - Counters only grow and checkpoints are only added. Starting over means
//!   clearing both via [`crate::db::pairs::reset_aggregation`].
//! - Keys are processed in ascending order so an interrupted run resumes at a
//!   predictable place.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::db::{SqliteStore, facts, pairs};
use crate::error::{ErrorCode, StoreError};
use crate::model::{AppId, AppPair, ReviewerId, pairs_of};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Read-only access to the review fact table.
pub trait FactSource {
    /// Distinct reviewers present in the fact table, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn distinct_keys(&self) -> Result<Vec<ReviewerId>, StoreError>;

    /// Apps the reviewer has reviewed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn values_for_key(&self, key: ReviewerId) -> Result<BTreeSet<AppId>, StoreError>;
}

/// Writes available inside one aggregation transaction.
pub trait PairWriter {
    /// Whether the reviewer is already in the checkpoint set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn is_checkpointed(&self, key: ReviewerId) -> Result<bool, StoreError>;

    /// Add `delta` to the pair's counter, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    fn upsert_pair_increment(&self, pair: AppPair, delta: u64) -> Result<(), StoreError>;

    /// Claim the reviewer in the checkpoint set. Returns `false` when it was
    /// already there.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    fn mark_checkpointed(&self, key: ReviewerId, pair_count: u64) -> Result<bool, StoreError>;
}

/// Transactional store for pair counters and checkpoints.
pub trait PairSink {
    /// The checkpoint set as it stands now.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn checkpointed_keys(&self) -> Result<BTreeSet<ReviewerId>, StoreError>;

    /// Run `f` inside a write transaction. Commits when `f` returns `Ok`,
    /// rolls back otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error from `f`, or from beginning/committing the
    /// transaction.
    fn in_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn PairWriter) -> Result<T, StoreError>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

impl FactSource for SqliteStore {
    fn distinct_keys(&self) -> Result<Vec<ReviewerId>, StoreError> {
        facts::distinct_reviewers(self.conn())
    }

    fn values_for_key(&self, key: ReviewerId) -> Result<BTreeSet<AppId>, StoreError> {
        facts::apps_for_reviewer(self.conn(), key)
    }
}

struct SqlitePairWriter<'conn> {
    conn: &'conn rusqlite::Connection,
}

impl PairWriter for SqlitePairWriter<'_> {
    fn is_checkpointed(&self, key: ReviewerId) -> Result<bool, StoreError> {
        pairs::is_checkpointed(self.conn, key)
    }

    fn upsert_pair_increment(&self, pair: AppPair, delta: u64) -> Result<(), StoreError> {
        pairs::upsert_pair_increment(self.conn, pair, delta)
    }

    fn mark_checkpointed(&self, key: ReviewerId, pair_count: u64) -> Result<bool, StoreError> {
        pairs::mark_checkpointed(self.conn, key, pair_count)
    }
}

impl PairSink for SqliteStore {
    fn checkpointed_keys(&self) -> Result<BTreeSet<ReviewerId>, StoreError> {
        pairs::checkpointed_reviewers(self.conn())
    }

    fn in_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn PairWriter) -> Result<T, StoreError>,
    {
        // IMMEDIATE takes the write lock up front, so the checkpoint re-check
        // inside `f` cannot race another writer.
        let tx = rusqlite::Transaction::new_unchecked(
            self.conn(),
            rusqlite::TransactionBehavior::Immediate,
        )?;
        let out = f(&SqlitePairWriter { conn: &tx })?;
        tx.commit()?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Result of one [`Aggregator::process_key_counted`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// The reviewer's pairs were counted and the reviewer checkpointed.
    Processed { pairs: u64 },
    /// The reviewer was already checkpointed; nothing was written.
    AlreadyCheckpointed,
}

/// The key that stopped a run, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyFailure {
    pub key: ReviewerId,
    pub error: String,
    pub error_code: ErrorCode,
    pub transient: bool,
}

/// Summary of a driver run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateReport {
    /// Reviewers already checkpointed when the run started.
    pub already_checkpointed: usize,
    /// Reviewers pending when the run started (after `limit`).
    pub scheduled: usize,
    /// Reviewers newly processed by this run.
    pub newly_processed: usize,
    /// Reviewers found checkpointed at processing time despite being pending
    /// at listing time.
    pub skipped_concurrent: usize,
    /// Pair increments applied by this run.
    pub pairs_touched: u64,
    /// Most recently checkpointed reviewer. Before this run checkpoints
    /// anything, the highest reviewer already in the checkpoint set.
    pub last_checkpointed: Option<ReviewerId>,
    /// Set when the run stopped at a failing reviewer.
    pub failure: Option<KeyFailure>,
    #[serde(serialize_with = "serialize_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,
}

impl AggregateReport {
    /// Whether every scheduled reviewer was handled.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Knobs for [`Aggregator::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Process at most this many pending reviewers.
    pub limit: Option<usize>,
}

/// Progress passed to the driver callback after each reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub key: ReviewerId,
    pub outcome: KeyOutcome,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Folds reviewers into the pair counters one checkpointed unit at a time.
pub struct Aggregator<'a, F, P> {
    source: &'a F,
    sink: &'a P,
}

impl<'a, F: FactSource, P: PairSink> Aggregator<'a, F, P> {
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(source: &'a F, sink: &'a P) -> Self {
        Self { source, sink }
    }

    /// Reviewers in the fact table that are not checkpointed, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be read.
    pub fn list_unprocessed_keys(&self) -> Result<Vec<ReviewerId>, StoreError> {
        let done = self.sink.checkpointed_keys()?;
        self.pending_against(&done)
    }

    fn pending_against(&self, done: &BTreeSet<ReviewerId>) -> Result<Vec<ReviewerId>, StoreError> {
        let mut keys: Vec<_> = self
            .source
            .distinct_keys()?
            .into_iter()
            .filter(|key| !done.contains(key))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    /// Fold one reviewer into the pair counters.
    ///
    /// Returns `true` if the reviewer was newly processed and `false` if it
    /// was already checkpointed, which makes redundant calls safe.
    ///
    /// # Errors
    ///
    /// Returns an error if any read or write fails. The transaction is rolled
    /// back and the reviewer stays unprocessed.
    pub fn process_key(&self, key: ReviewerId) -> Result<bool, StoreError> {
        Ok(matches!(
            self.process_key_counted(key)?,
            KeyOutcome::Processed { .. }
        ))
    }

    /// Like [`process_key`](Self::process_key) but reports the number of
    /// pair increments applied.
    ///
    /// # Errors
    ///
    /// Returns an error if any read or write fails, or
    /// [`StoreError::ClaimConflict`] if the checkpoint claim finds the
    /// reviewer already present.
    pub fn process_key_counted(&self, key: ReviewerId) -> Result<KeyOutcome, StoreError> {
        self.sink.in_transaction(|writer| {
            if writer.is_checkpointed(key)? {
                return Ok(KeyOutcome::AlreadyCheckpointed);
            }

            let apps = self.source.values_for_key(key)?;
            let mut touched = 0_u64;
            for pair in pairs_of(&apps) {
                writer.upsert_pair_increment(pair, 1)?;
                touched += 1;
            }

            if !writer.mark_checkpointed(key, touched)? {
                return Err(StoreError::ClaimConflict { key });
            }

            tracing::trace!(reviewer = %key, apps = apps.len(), pairs = touched, "reviewer folded");
            Ok(KeyOutcome::Processed { pairs: touched })
        })
    }

    /// Process every pending reviewer in ascending order, stopping at the
    /// first failure.
    ///
    /// A failing reviewer is logged and reported in
    /// [`AggregateReport::failure`]; it was rolled back, so the next run
    /// retries it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the pending set cannot be listed, in which
    /// case nothing was processed.
    pub fn run(
        &self,
        options: RunOptions,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<AggregateReport, StoreError> {
        let start = Instant::now();

        let done = self.sink.checkpointed_keys()?;
        let already_checkpointed = done.len();
        let mut pending = self.pending_against(&done)?;
        if let Some(limit) = options.limit {
            pending.truncate(limit);
        }

        tracing::info!(
            already_checkpointed,
            pending = pending.len(),
            "starting shared-reviewer aggregation"
        );

        let mut report = AggregateReport {
            already_checkpointed,
            scheduled: pending.len(),
            newly_processed: 0,
            skipped_concurrent: 0,
            pairs_touched: 0,
            last_checkpointed: done.last().copied(),
            failure: None,
            elapsed: Duration::ZERO,
        };

        let total = pending.len();
        for (idx, key) in pending.into_iter().enumerate() {
            match self.process_key_counted(key) {
                Ok(outcome) => {
                    match outcome {
                        KeyOutcome::Processed { pairs } => {
                            report.newly_processed += 1;
                            report.pairs_touched += pairs;
                            report.last_checkpointed = Some(key);
                        }
                        KeyOutcome::AlreadyCheckpointed => report.skipped_concurrent += 1,
                    }
                    on_progress(Progress {
                        done: idx + 1,
                        total,
                        key,
                        outcome,
                    });
                }
                Err(error) => {
                    tracing::error!(
                        reviewer = %key,
                        error = %error,
                        code = %error.code(),
                        last_checkpointed = ?report.last_checkpointed,
                        "aggregation stopped at failing reviewer"
                    );
                    report.failure = Some(KeyFailure {
                        key,
                        error: error.to_string(),
                        error_code: error.code(),
                        transient: error.is_transient(),
                    });
                    break;
                }
            }
        }

        report.elapsed = start.elapsed();
        tracing::info!(
            already_checkpointed = report.already_checkpointed,
            newly_processed = report.newly_processed,
            skipped_concurrent = report.skipped_concurrent,
            pairs_touched = report.pairs_touched,
            elapsed_ms = report.elapsed.as_millis(),
            complete = report.is_complete(),
            "shared-reviewer aggregation finished"
        );

        Ok(report)
    }
}

/// Run the aggregator over a `SQLite` store and stamp the run time in
/// `store_meta`.
///
/// Failing to stamp the run time is logged and does not discard the report:
/// by then reviewers may already be committed.
///
/// # Errors
///
/// Returns an error only if the pending set cannot be listed.
pub fn aggregate_store(
    store: &SqliteStore,
    options: RunOptions,
    on_progress: impl FnMut(Progress),
) -> Result<AggregateReport, StoreError> {
    let report = Aggregator::new(store, store).run(options, on_progress)?;
    if let Err(error) = store.record_run() {
        tracing::warn!(error = %error, code = %error.code(), "failed to record aggregation run time");
    }
    Ok(report)
}
