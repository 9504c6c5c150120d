//! `steamgraph import`: load JSONL review facts into the store.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use steamgraph_core::config::EffectiveConfig;
use steamgraph_core::db::facts::{self, ImportStats};
use steamgraph_core::error::StoreError;

use super::open_store;
use crate::output::{CliError, OutputMode, render, render_error};

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSONL files with one `{"appid", "reviewer_id"}` record per line.
    #[arg(required = true, value_name = "FILES")]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct FileImport {
    path: PathBuf,
    #[serde(flatten)]
    stats: ImportStats,
}

#[derive(Debug, Default, Serialize)]
struct ImportReport {
    files: Vec<FileImport>,
    inserted: usize,
    duplicates: usize,
}

/// Execute `steamgraph import`.
///
/// Each file is imported in its own transaction. A malformed line aborts
/// the command; files imported before it stay committed.
///
/// # Errors
///
/// Returns an error if the store is missing, a file cannot be read, or a
/// line is malformed.
pub fn run_import(args: &ImportArgs, config: &EffectiveConfig, output: OutputMode) -> Result<()> {
    let store = open_store(config, output)?;
    let mut report = ImportReport::default();

    for path in &args.files {
        let stats = match File::open(path)
            .map_err(StoreError::from)
            .and_then(|file| facts::import_jsonl(store.conn(), BufReader::new(file)))
        {
            Ok(stats) => stats,
            Err(err) => {
                tracing::error!(file = %path.display(), error = %err, "import failed");
                render_error(
                    output,
                    &CliError::with_code(format!("{}: {err}", path.display()), err.code()),
                )?;
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to import {}", path.display())));
            }
        };

        tracing::info!(
            file = %path.display(),
            inserted = stats.inserted,
            duplicates = stats.duplicates,
            "imported fact file"
        );
        report.inserted += stats.inserted;
        report.duplicates += stats.duplicates;
        report.files.push(FileImport {
            path: path.clone(),
            stats,
        });
    }

    render(output, &report, |r, w| {
        for file in &r.files {
            writeln!(
                w,
                "{}: inserted={} duplicates={}",
                file.path.display(),
                file.stats.inserted,
                file.stats.duplicates
            )?;
        }
        writeln!(w, "import: inserted={} duplicates={}", r.inserted, r.duplicates)
    })
}
