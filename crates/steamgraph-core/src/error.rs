use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::model::ReviewerId;

/// Stable `E####` codes for scripts and cron jobs that drive steamgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    StoreUnavailable,
    MigrationFailed,
    CorruptStore,
    CountOutOfRange,
    MalformedFact,
    TransientStore,
    CheckpointConflict,
    ImportReadFailed,
    LockContention,
    LockFileFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::StoreUnavailable => "E1003",
            Self::MigrationFailed => "E1004",
            Self::CorruptStore => "E3001",
            Self::CountOutOfRange => "E3002",
            Self::MalformedFact => "E3003",
            Self::TransientStore => "E4001",
            Self::CheckpointConflict => "E4002",
            Self::ImportReadFailed => "E5001",
            Self::LockContention => "E5002",
            Self::LockFileFailed => "E5003",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::StoreUnavailable => "Store unavailable",
            Self::MigrationFailed => "Schema migration failed",
            Self::CorruptStore => "Corrupt SQLite store",
            Self::CountOutOfRange => "Stored value out of range",
            Self::MalformedFact => "Malformed review fact",
            Self::TransientStore => "Transient store failure",
            Self::CheckpointConflict => "Reviewer already checkpointed",
            Self::ImportReadFailed => "Fact file read failed",
            Self::LockContention => "Lock contention",
            Self::LockFileFailed => "Lock file unavailable",
        }
    }

    /// Optional remediation hint printed as the CLI suggestion line.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `steamgraph init` to create the store."),
            Self::ConfigParseError => Some("Fix syntax in .steamgraph/config.toml and retry."),
            Self::StoreUnavailable => {
                Some("Check the database path, permissions, and STEAMGRAPH_DB.")
            }
            Self::MigrationFailed => Some("Restore a backup or recreate the store with `steamgraph init`."),
            Self::CorruptStore | Self::CountOutOfRange => {
                Some("Run `steamgraph reset --yes` and re-aggregate.")
            }
            Self::MalformedFact => Some("Fix the reported line and re-run the import."),
            Self::TransientStore | Self::CheckpointConflict => {
                Some("Re-run `steamgraph aggregate`; it resumes from the last checkpoint.")
            }
            Self::ImportReadFailed => Some("Check that the fact file exists and is readable."),
            Self::LockContention => {
                Some("Retry after the other `steamgraph` process releases its lock.")
            }
            Self::LockFileFailed => Some("Check write permissions on the .steamgraph directory."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl serde::Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Errors raised by the review store and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be opened, configured, or migrated. Nothing was
    /// processed.
    #[error("store unavailable at {}: {source}", .path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A schema migration failed and was rolled back.
    #[error("schema migration to v{version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    /// A statement failed mid-unit (busy, locked, I/O). The unit was rolled
    /// back and can be retried.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The checkpoint claim found the reviewer already recorded.
    #[error("reviewer {key} was checkpointed concurrently")]
    ClaimConflict { key: ReviewerId },

    /// A stored integer could not be represented in the Rust type.
    #[error("value {value} out of range for column {column}")]
    OutOfRange { column: &'static str, value: i64 },

    /// A fact record could not be parsed.
    #[error("line {line}: {reason}")]
    MalformedFact { line: usize, reason: String },

    /// File I/O while importing facts.
    #[error("fact file I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable { .. } => ErrorCode::StoreUnavailable,
            Self::Migration { .. } => ErrorCode::MigrationFailed,
            Self::Sqlite(err) if is_corruption(err) => ErrorCode::CorruptStore,
            Self::Sqlite(_) => ErrorCode::TransientStore,
            Self::ClaimConflict { .. } => ErrorCode::CheckpointConflict,
            Self::OutOfRange { .. } => ErrorCode::CountOutOfRange,
            Self::MalformedFact { .. } => ErrorCode::MalformedFact,
            Self::Io(_) => ErrorCode::ImportReadFailed,
        }
    }

    /// Whether re-running the same operation may succeed without operator
    /// intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::TransientStore | ErrorCode::CheckpointConflict
        )
    }

    /// Optional remediation hint shown under the error.
    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase)
    )
}
