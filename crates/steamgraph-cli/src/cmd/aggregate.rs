//! `steamgraph aggregate`: fold pending reviewers into the pair graph.

use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use steamgraph_core::aggregate::{AggregateReport, Progress, RunOptions, aggregate_store};
use steamgraph_core::config::EffectiveConfig;

use super::{acquire_run_lock, open_store, store_failure};
use crate::output::{
    CliError, OutputMode, pretty_kv, pretty_section, render_error, render_mode,
};

#[derive(Args, Debug, Default)]
pub struct AggregateArgs {
    /// Process at most this many pending reviewers, then stop.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
}

/// Execute `steamgraph aggregate`.
///
/// Holds the run lock for the whole run. On a failing reviewer the report is
/// still printed, then the command exits non-zero; rerunning resumes at that
/// reviewer.
///
/// # Errors
///
/// Returns an error if the lock is held elsewhere, the store is missing or
/// unreadable, or a reviewer failed.
pub fn run_aggregate(
    args: &AggregateArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    quiet: bool,
) -> Result<()> {
    let lock = acquire_run_lock(config, output)?;
    let store = open_store(config, output)?;

    let every = config.project.aggregate.progress_every;
    let report = aggregate_store(&store, RunOptions { limit: args.limit }, |p| {
        log_progress(&p, every, quiet);
    })
    .map_err(|err| store_failure(output, err, "aggregation did not start"))?;
    lock.release();

    render_mode(output, &report, render_text, render_pretty)?;

    if let Some(failure) = &report.failure {
        let resume = report
            .last_checkpointed
            .map_or_else(|| "none".to_string(), |k| k.to_string());
        render_error(
            output,
            &CliError::with_code(
                format!(
                    "reviewer {} failed: {}; last checkpointed reviewer: {resume}",
                    failure.key, failure.error
                ),
                failure.error_code,
            ),
        )?;
        anyhow::bail!("aggregation stopped at reviewer {}", failure.key);
    }

    Ok(())
}

fn log_progress(p: &Progress, every: usize, quiet: bool) {
    if quiet || every == 0 {
        return;
    }
    if p.done % every == 0 || p.done == p.total {
        tracing::info!(done = p.done, total = p.total, reviewer = %p.key, "aggregation progress");
    }
}

fn render_text(r: &AggregateReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "aggregate: already={} scheduled={} processed={} skipped={} pairs={} elapsed_ms={}",
        r.already_checkpointed,
        r.scheduled,
        r.newly_processed,
        r.skipped_concurrent,
        r.pairs_touched,
        r.elapsed.as_millis()
    )
}

fn render_pretty(r: &AggregateReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Shared-reviewer aggregation")?;
    pretty_kv(w, "already checkpointed", r.already_checkpointed.to_string())?;
    pretty_kv(w, "scheduled", r.scheduled.to_string())?;
    pretty_kv(w, "newly processed", r.newly_processed.to_string())?;
    pretty_kv(w, "skipped (concurrent)", r.skipped_concurrent.to_string())?;
    pretty_kv(w, "pair increments", r.pairs_touched.to_string())?;
    if let Some(last) = r.last_checkpointed {
        pretty_kv(w, "last checkpointed", last.to_string())?;
    }
    pretty_kv(w, "elapsed", format!("{:.2?}", r.elapsed))?;
    let state = if r.is_complete() { "complete" } else { "stopped" };
    pretty_kv(w, "state", state)
}
