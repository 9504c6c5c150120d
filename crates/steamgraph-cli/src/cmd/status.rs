//! `steamgraph status`: fact, checkpoint, and pair counts.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use chrono::DateTime;
use clap::Args;
use serde::Serialize;
use steamgraph_core::config::EffectiveConfig;
use steamgraph_core::db::StoreMeta;
use steamgraph_core::db::pairs::{self, StoreStatus};

use super::{open_store, store_failure};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug, Default)]
pub struct StatusArgs {}

#[derive(Debug, Serialize)]
struct StatusReport {
    db_path: PathBuf,
    #[serde(flatten)]
    status: StoreStatus,
    schema_version: i64,
    last_run_at: Option<String>,
    last_checkpointed_reviewer: Option<i64>,
}

impl StatusReport {
    fn new(db_path: PathBuf, status: StoreStatus, meta: &StoreMeta) -> Self {
        let last_run_at = (meta.last_run_at_us > 0)
            .then(|| DateTime::from_timestamp_micros(meta.last_run_at_us))
            .flatten()
            .map(|t| t.to_rfc3339());
        Self {
            db_path,
            status,
            schema_version: meta.schema_version,
            last_run_at,
            last_checkpointed_reviewer: meta.last_checkpointed_reviewer.map(|k| k.0),
        }
    }
}

/// Execute `steamgraph status`.
///
/// # Errors
///
/// Returns an error if the store is missing or a count query fails.
pub fn run_status(_args: &StatusArgs, config: &EffectiveConfig, output: OutputMode) -> Result<()> {
    let store = open_store(config, output)?;
    let status = pairs::store_status(store.conn())
        .map_err(|err| store_failure(output, err, "failed to read store status"))?;
    let meta = store
        .meta()
        .map_err(|err| store_failure(output, err, "failed to read store metadata"))?;

    let report = StatusReport::new(config.db_path.clone(), status, &meta);
    render_mode(output, &report, render_text, render_pretty)
}

fn render_text(r: &StatusReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "facts={} reviewers={} apps={} checkpointed={} pending={} pairs={}",
        r.status.facts.facts,
        r.status.facts.reviewers,
        r.status.facts.apps,
        r.status.checkpointed_reviewers,
        r.status.pending_reviewers,
        r.status.pair_rows
    )
}

fn render_pretty(r: &StatusReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "steamgraph status")?;
    pretty_kv(w, "database", r.db_path.display().to_string())?;
    pretty_kv(w, "schema version", r.schema_version.to_string())?;
    pretty_kv(w, "review facts", r.status.facts.facts.to_string())?;
    pretty_kv(w, "reviewers", r.status.facts.reviewers.to_string())?;
    pretty_kv(w, "apps", r.status.facts.apps.to_string())?;
    pretty_kv(w, "checkpointed", r.status.checkpointed_reviewers.to_string())?;
    pretty_kv(w, "pending", r.status.pending_reviewers.to_string())?;
    pretty_kv(w, "pair rows", r.status.pair_rows.to_string())?;
    pretty_kv(w, "last run", r.last_run_at.as_deref().unwrap_or("never"))?;
    if let Some(last) = r.last_checkpointed_reviewer {
        pretty_kv(w, "last checkpointed", last.to_string())?;
    }
    Ok(())
}
