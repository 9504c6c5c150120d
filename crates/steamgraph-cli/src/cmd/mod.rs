pub mod aggregate;
pub mod completions;
pub mod import;
pub mod init;
pub mod pairs;
pub mod reset;
pub mod status;

use anyhow::Result;
use steamgraph_core::config::EffectiveConfig;
use steamgraph_core::db::SqliteStore;
use steamgraph_core::error::{ErrorCode, StoreError};
use steamgraph_core::lock::RunLock;

use crate::output::{CliError, OutputMode, render_error};

/// Render `err` on stderr and turn it into the command's failure.
pub fn store_failure(output: OutputMode, err: StoreError, context: &'static str) -> anyhow::Error {
    if let Err(render_err) = render_error(output, &CliError::from(&err)) {
        tracing::warn!(error = %render_err, "failed to render error");
    }
    anyhow::Error::new(err).context(context)
}

/// Open the configured store, reporting `NotInitialized` when it does not
/// exist yet.
pub fn open_store(config: &EffectiveConfig, output: OutputMode) -> Result<SqliteStore> {
    match SqliteStore::try_open(&config.db_path, config.project.store.busy_timeout()) {
        Ok(Some(store)) => Ok(store),
        Ok(None) => {
            render_error(
                output,
                &CliError::with_code(
                    format!("no store at {}", config.db_path.display()),
                    ErrorCode::NotInitialized,
                ),
            )?;
            anyhow::bail!("store not initialized");
        }
        Err(err) => Err(store_failure(output, err, "failed to open store")),
    }
}

/// Take the exclusive run lock for commands that write derived tables.
pub fn acquire_run_lock(config: &EffectiveConfig, output: OutputMode) -> Result<RunLock> {
    RunLock::acquire(&config.lock_path, config.project.aggregate.lock_timeout()).map_err(|err| {
        if let Err(render_err) = render_error(output, &CliError::from(&err)) {
            tracing::warn!(error = %render_err, "failed to render error");
        }
        anyhow::Error::new(err).context("failed to acquire run lock")
    })
}
