//! `steamgraph init`: create `.steamgraph/`, its config, and the store.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use steamgraph_core::config::{self, EffectiveConfig};
use steamgraph_core::db::SqliteStore;

use super::store_failure;
use crate::output::{OutputMode, pretty_kv, render};

#[derive(Args, Debug, Default)]
pub struct InitArgs {}

#[derive(Debug, Serialize)]
struct InitReport {
    db_path: PathBuf,
    config_path: PathBuf,
    config_written: bool,
    store_created: bool,
    schema_version: i64,
}

/// Execute `steamgraph init`. Creates the project skeleton:
///
/// ```text
/// .steamgraph/
///   config.toml      (default config, kept if present)
///   steamgraph.db    (migrated store, unless STEAMGRAPH_DB points elsewhere)
/// ```
///
/// Running it again is safe: an existing config is left alone and an
/// existing store is only migrated forward.
///
/// # Errors
///
/// Returns an error if the config cannot be written or the store cannot be
/// opened and migrated.
pub fn run_init(
    _args: &InitArgs,
    config: &EffectiveConfig,
    output: OutputMode,
    project_root: &Path,
) -> Result<()> {
    let config_written = config::write_default_config(project_root)?;
    let store_created = !config.db_path.exists();

    let store = SqliteStore::open(&config.db_path, config.project.store.busy_timeout())
        .map_err(|err| store_failure(output, err, "failed to create store"))?;
    let meta = store
        .meta()
        .map_err(|err| store_failure(output, err, "failed to read store metadata"))?;

    tracing::info!(
        db = %config.db_path.display(),
        created = store_created,
        schema_version = meta.schema_version,
        "store ready"
    );

    let report = InitReport {
        db_path: config.db_path.clone(),
        config_path: config::config_path(project_root),
        config_written,
        store_created,
        schema_version: meta.schema_version,
    };

    render(output, &report, |r, w| {
        let verb = if r.store_created { "created" } else { "already initialized" };
        writeln!(w, "store {verb}")?;
        pretty_kv(w, "database", r.db_path.display().to_string())?;
        pretty_kv(w, "config", r.config_path.display().to_string())?;
        pretty_kv(w, "schema version", r.schema_version.to_string())
    })
}
