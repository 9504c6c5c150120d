use std::io::Write;

use anyhow::Result;
use clap::Args;
use steamgraph_core::config::EffectiveConfig;
use steamgraph_core::db::pairs;

use super::{acquire_run_lock, open_store, store_failure};
use crate::output::{CliError, OutputMode, render, render_error};

#[derive(Args, Debug, Default)]
pub struct ResetArgs {
    /// Confirm clearing every pair counter and checkpoint.
    #[arg(long)]
    pub yes: bool,
}

/// Execute `steamgraph reset`. Clears the derived tables so the next
/// `aggregate` recomputes the graph from every fact; facts are kept.
///
/// # Errors
///
/// Returns an error without `--yes`, if the run lock is held elsewhere, or
/// if the store cannot be cleared.
pub fn run_reset(args: &ResetArgs, config: &EffectiveConfig, output: OutputMode) -> Result<()> {
    if !args.yes {
        render_error(
            output,
            &CliError::new("reset clears all pair counts and checkpoints; pass --yes to confirm"),
        )?;
        anyhow::bail!("reset not confirmed");
    }

    let lock = acquire_run_lock(config, output)?;
    let store = open_store(config, output)?;
    let stats = pairs::reset_aggregation(store.conn())
        .map_err(|err| store_failure(output, err, "reset failed"))?;
    lock.release();

    render(output, &stats, |s, w| {
        writeln!(
            w,
            "reset: pairs_deleted={} checkpoints_deleted={}",
            s.pairs_deleted, s.checkpoints_deleted
        )
    })
}
