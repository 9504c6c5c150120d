//! Fault-injection tests for the per-reviewer atomic unit.
//!
//! These tests exercise the failure modes a run can hit mid-reviewer:
//! - a write failing after the pair increments but before the checkpoint
//! - a write failing part-way through the pair increments
//! - another connection holding the database write lock, before or during
//!   a run
//!
//! In every case the failing reviewer must be either fully applied or not at
//! all, and the next run must pick it up.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use steamgraph_core::aggregate::{Aggregator, PairSink, PairWriter, RunOptions, aggregate_store};
use steamgraph_core::db::facts::{ReviewFact, insert_facts};
use steamgraph_core::db::pairs::top_pairs;
use steamgraph_core::db::{DEFAULT_BUSY_TIMEOUT, SqliteStore};
use steamgraph_core::error::{ErrorCode, StoreError};
use steamgraph_core::model::{AppId, AppPair, ReviewerId};
use tempfile::TempDir;

#[derive(Clone, Copy)]
enum FaultPoint {
    /// Fail the checkpoint write, after every pair increment succeeded.
    BeforeCheckpoint,
    /// Fail the n-th pair increment (1-based).
    PairIncrement(usize),
}

struct FaultySink<'a> {
    inner: &'a SqliteStore,
    fail_on: ReviewerId,
    point: FaultPoint,
}

struct FaultyWriter<'w> {
    inner: &'w dyn PairWriter,
    fail_on: ReviewerId,
    point: FaultPoint,
    current: Cell<Option<ReviewerId>>,
    increments: Cell<usize>,
}

fn injected() -> StoreError {
    StoreError::Sqlite(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
        Some("injected fault".to_string()),
    ))
}

impl PairWriter for FaultyWriter<'_> {
    fn is_checkpointed(&self, key: ReviewerId) -> Result<bool, StoreError> {
        self.current.set(Some(key));
        self.inner.is_checkpointed(key)
    }

    fn upsert_pair_increment(&self, pair: AppPair, delta: u64) -> Result<(), StoreError> {
        self.inner.upsert_pair_increment(pair, delta)?;
        let n = self.increments.get() + 1;
        self.increments.set(n);
        if let FaultPoint::PairIncrement(at) = self.point {
            if self.current.get() == Some(self.fail_on) && n == at {
                return Err(injected());
            }
        }
        Ok(())
    }

    fn mark_checkpointed(&self, key: ReviewerId, pair_count: u64) -> Result<bool, StoreError> {
        if matches!(self.point, FaultPoint::BeforeCheckpoint) && key == self.fail_on {
            return Err(injected());
        }
        self.inner.mark_checkpointed(key, pair_count)
    }
}

impl PairSink for FaultySink<'_> {
    fn checkpointed_keys(&self) -> Result<BTreeSet<ReviewerId>, StoreError> {
        self.inner.checkpointed_keys()
    }

    fn in_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn PairWriter) -> Result<T, StoreError>,
    {
        self.inner.in_transaction(|writer| {
            f(&FaultyWriter {
                inner: writer,
                fail_on: self.fail_on,
                point: self.point,
                current: Cell::new(None),
                increments: Cell::new(0),
            })
        })
    }
}

fn store_with(facts: &[(i64, i64)]) -> (TempDir, SqliteStore) {
    let dir = TempDir::new().expect("create temp dir");
    let store = SqliteStore::open(&dir.path().join("steamgraph.db"), DEFAULT_BUSY_TIMEOUT)
        .expect("open store");
    let facts: Vec<_> = facts
        .iter()
        .map(|&(reviewer, app)| ReviewFact::new(ReviewerId(reviewer), AppId(app)))
        .collect();
    insert_facts(store.conn(), &facts).expect("insert facts");
    (dir, store)
}

fn snapshot(store: &SqliteStore) -> BTreeMap<(i64, i64), u64> {
    top_pairs(store.conn(), None)
        .expect("read pairs")
        .into_iter()
        .map(|p| ((p.appid_low.0, p.appid_high.0), p.shared_count))
        .collect()
}

const FACTS: &[(i64, i64)] = &[
    (1, 10),
    (1, 20),
    (2, 10),
    (2, 20),
    (2, 30),
    (3, 20),
    (3, 30),
];

#[test]
fn fault_before_checkpoint_leaves_no_increments() {
    let (_dir, store) = store_with(FACTS);
    let sink = FaultySink {
        inner: &store,
        fail_on: ReviewerId(2),
        point: FaultPoint::BeforeCheckpoint,
    };
    let agg = Aggregator::new(&store, &sink);

    let err = agg.process_key(ReviewerId(2)).unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.code(), ErrorCode::TransientStore);

    assert!(snapshot(&store).is_empty());
    assert!(!store.checkpointed_keys().expect("checkpoints").contains(&ReviewerId(2)));
}

#[test]
fn fault_mid_pairs_rolls_back_earlier_increments() {
    let (_dir, store) = store_with(FACTS);
    let sink = FaultySink {
        inner: &store,
        fail_on: ReviewerId(2),
        point: FaultPoint::PairIncrement(2),
    };
    let agg = Aggregator::new(&store, &sink);

    assert!(agg.process_key(ReviewerId(2)).is_err());
    assert!(snapshot(&store).is_empty());
    assert_eq!(
        agg.list_unprocessed_keys().expect("pending"),
        vec![ReviewerId(1), ReviewerId(2), ReviewerId(3)]
    );
}

#[test]
fn driver_stops_at_failing_reviewer_and_reports_last_checkpoint() {
    let (_dir, store) = store_with(FACTS);
    let sink = FaultySink {
        inner: &store,
        fail_on: ReviewerId(2),
        point: FaultPoint::BeforeCheckpoint,
    };

    let mut progressed = Vec::new();
    let report = Aggregator::new(&store, &sink)
        .run(RunOptions::default(), |p| progressed.push(p.key))
        .expect("run lists pending reviewers");

    assert!(!report.is_complete());
    assert_eq!(report.newly_processed, 1);
    assert_eq!(report.last_checkpointed, Some(ReviewerId(1)));
    let failure = report.failure.expect("failure recorded");
    assert_eq!(failure.key, ReviewerId(2));
    assert!(failure.transient);
    assert_eq!(failure.error_code, ErrorCode::TransientStore);

    // Reviewer 3 comes after the failure and must not have been attempted.
    assert_eq!(progressed, vec![ReviewerId(1)]);
    assert_eq!(snapshot(&store), BTreeMap::from([((10, 20), 1)]));

    // A clean rerun resumes at the failed reviewer and converges.
    let report = Aggregator::new(&store, &store)
        .run(RunOptions::default(), |_| {})
        .expect("rerun");
    assert!(report.is_complete());
    assert_eq!(report.already_checkpointed, 1);
    assert_eq!(report.newly_processed, 2);
    assert_eq!(
        snapshot(&store),
        BTreeMap::from([((10, 20), 2), ((10, 30), 1), ((20, 30), 2)])
    );
}

#[test]
fn write_lock_held_elsewhere_fails_without_partial_state() {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("steamgraph.db");
    let store = SqliteStore::open(&path, Duration::from_millis(20)).expect("open store");
    insert_facts(
        store.conn(),
        &[
            ReviewFact::new(ReviewerId(1), AppId(10)),
            ReviewFact::new(ReviewerId(1), AppId(20)),
        ],
    )
    .expect("insert facts");

    let blocker = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("open second store");
    blocker
        .conn()
        .execute_batch("BEGIN IMMEDIATE")
        .expect("hold write lock");

    let agg = Aggregator::new(&store, &store);
    let report = agg.run(RunOptions::default(), |_| {}).expect("listing still works");
    let failure = report.failure.expect("busy store stops the run");
    assert_eq!(failure.key, ReviewerId(1));
    assert!(failure.transient);

    blocker.conn().execute_batch("ROLLBACK").expect("release write lock");

    assert!(snapshot(&store).is_empty());
    assert!(agg.process_key(ReviewerId(1)).expect("retry succeeds"));
    assert_eq!(snapshot(&store), BTreeMap::from([((10, 20), 1)]));
}

fn file_store(busy_timeout: Duration) -> (TempDir, std::path::PathBuf, SqliteStore) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("steamgraph.db");
    let store = SqliteStore::open(&path, busy_timeout).expect("open store");
    (dir, path, store)
}

#[test]
fn write_lock_taken_mid_run_keeps_report_and_resume_point() {
    let (_dir, path, store) = file_store(Duration::from_millis(20));
    insert_facts(
        store.conn(),
        &[
            ReviewFact::new(ReviewerId(1), AppId(10)),
            ReviewFact::new(ReviewerId(1), AppId(20)),
            ReviewFact::new(ReviewerId(2), AppId(10)),
            ReviewFact::new(ReviewerId(2), AppId(30)),
        ],
    )
    .expect("insert facts");
    let blocker = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("open second store");

    let report = aggregate_store(&store, RunOptions::default(), |p| {
        if p.key == ReviewerId(1) {
            blocker
                .conn()
                .execute_batch("BEGIN IMMEDIATE")
                .expect("hold write lock");
        }
    })
    .expect("report survives a locked store");

    assert_eq!(report.newly_processed, 1);
    assert_eq!(report.last_checkpointed, Some(ReviewerId(1)));
    let failure = report.failure.expect("second reviewer blocked");
    assert_eq!(failure.key, ReviewerId(2));
    assert_eq!(failure.error_code, ErrorCode::TransientStore);

    blocker.conn().execute_batch("ROLLBACK").expect("release write lock");

    assert_eq!(
        store.checkpointed_keys().expect("checkpoints"),
        BTreeSet::from([ReviewerId(1)])
    );
    assert_eq!(
        store.meta().expect("meta").last_checkpointed_reviewer,
        Some(ReviewerId(1))
    );
    assert_eq!(snapshot(&store), BTreeMap::from([((10, 20), 1)]));
}

#[test]
fn failure_on_first_pending_reports_checkpoint_from_earlier_run() {
    let (_dir, path, store) = file_store(Duration::from_millis(20));
    insert_facts(
        store.conn(),
        &[
            ReviewFact::new(ReviewerId(1), AppId(10)),
            ReviewFact::new(ReviewerId(1), AppId(20)),
        ],
    )
    .expect("insert facts");
    aggregate_store(&store, RunOptions::default(), |_| {}).expect("first run");

    insert_facts(store.conn(), &[ReviewFact::new(ReviewerId(2), AppId(10))])
        .expect("insert late fact");
    let blocker = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).expect("open second store");
    blocker
        .conn()
        .execute_batch("BEGIN IMMEDIATE")
        .expect("hold write lock");

    let report = aggregate_store(&store, RunOptions::default(), |_| {}).expect("second run");
    blocker.conn().execute_batch("ROLLBACK").expect("release write lock");

    assert_eq!(report.newly_processed, 0);
    assert_eq!(report.failure.expect("blocked").key, ReviewerId(2));
    assert_eq!(report.last_checkpointed, Some(ReviewerId(1)));
}
