//! Canonical `SQLite` schema for the steamgraph store.
//!
//! - `reviews` is the fact table: one row per (reviewer, app) observation
//! - `app_shared_reviewers` holds one counter per canonical app pair
//! - `shared_reviewers_checkpoints` records reviewers already folded into
//!   the counters
//! - `store_meta` tracks schema version and the last aggregation run

/// Migration v1: fact table plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS reviews (
    reviewer_id INTEGER NOT NULL,
    appid INTEGER NOT NULL,
    recommendation_id INTEGER,
    imported_at_us INTEGER NOT NULL,
    PRIMARY KEY (reviewer_id, appid)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_run_at_us INTEGER NOT NULL DEFAULT 0,
    last_checkpointed_reviewer INTEGER
);

INSERT OR IGNORE INTO store_meta (
    id,
    schema_version,
    last_run_at_us,
    last_checkpointed_reviewer
) VALUES (1, 1, 0, NULL);
";

/// Migration v2: pair counters, checkpoint set, and read-path indexes.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS app_shared_reviewers (
    appid_low INTEGER NOT NULL,
    appid_high INTEGER NOT NULL,
    shared_count INTEGER NOT NULL CHECK (shared_count > 0),
    PRIMARY KEY (appid_low, appid_high),
    CHECK (appid_low < appid_high)
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS shared_reviewers_checkpoints (
    reviewer_id INTEGER PRIMARY KEY,
    pair_count INTEGER NOT NULL DEFAULT 0,
    processed_at_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_appid
    ON reviews(appid, reviewer_id);

CREATE INDEX IF NOT EXISTS idx_app_shared_reviewers_high
    ON app_shared_reviewers(appid_high, appid_low);

CREATE INDEX IF NOT EXISTS idx_app_shared_reviewers_count
    ON app_shared_reviewers(shared_count DESC);
";

/// Indexes every migrated store must carry.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_reviews_appid",
    "idx_app_shared_reviewers_high",
    "idx_app_shared_reviewers_count",
];

/// Tables every migrated store must carry.
pub const REQUIRED_TABLES: &[&str] = &[
    "reviews",
    "store_meta",
    "app_shared_reviewers",
    "shared_reviewers_checkpoints",
];
