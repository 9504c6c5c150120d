#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{CliError, OutputMode, render_error};
use std::env;
use steamgraph_core::config::{self, EffectiveConfig};
use steamgraph_core::error::ErrorCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "steamgraph: incremental shared-reviewer graph for Steam apps",
    long_about = None
)]
struct Cli {
    /// Enable debug logging (ignored when STEAMGRAPH_LOG is set).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress logging.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Initialize a steamgraph store",
        long_about = "Create .steamgraph/ with a default config and a migrated SQLite store.",
        after_help = "EXAMPLES:\n    # Initialize in the current directory\n    steamgraph init\n\n    # Use a store outside the project\n    STEAMGRAPH_DB=/data/steam.db steamgraph init"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Import review facts",
        long_about = "Import JSONL review facts ({\"appid\", \"reviewer_id\"} per line). Re-importing a fact is a no-op.",
        after_help = "EXAMPLES:\n    # Import one or more files\n    steamgraph import reviews-2024-01.jsonl reviews-2024-02.jsonl\n\n    # Emit machine-readable output\n    steamgraph import reviews.jsonl --json"
    )]
    Import(cmd::import::ImportArgs),

    #[command(
        next_help_heading = "Aggregation",
        about = "Fold pending reviewers into the pair graph",
        long_about = "Process every reviewer not yet checkpointed, one atomic unit per reviewer, in ascending order.",
        after_help = "EXAMPLES:\n    # Process everything pending\n    steamgraph aggregate\n\n    # Process at most 10000 reviewers\n    steamgraph aggregate --limit 10000"
    )]
    Aggregate(cmd::aggregate::AggregateArgs),

    #[command(
        next_help_heading = "Aggregation",
        about = "Clear pair counts and checkpoints",
        long_about = "Delete every pair counter and checkpoint so the next aggregate recomputes the graph. Facts are kept.",
        after_help = "EXAMPLES:\n    # Full re-aggregation\n    steamgraph reset --yes && steamgraph aggregate"
    )]
    Reset(cmd::reset::ResetArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show store counts",
        long_about = "Show fact, reviewer, app, checkpoint, pending, and pair counts plus the last run.",
        after_help = "EXAMPLES:\n    # Show status\n    steamgraph status\n\n    # Emit machine-readable output\n    steamgraph status --json"
    )]
    Status(cmd::status::StatusArgs),

    #[command(
        next_help_heading = "Read",
        about = "Query shared-reviewer pairs",
        long_about = "List the top pairs, the top partners of one app, or the count for one pair.",
        after_help = "EXAMPLES:\n    # Top 20 pairs overall\n    steamgraph pairs\n\n    # Apps sharing the most reviewers with 440\n    steamgraph pairs --app 440 --limit 10\n\n    # Count for one pair\n    steamgraph pairs --app 440 --with 570"
    )]
    Pairs(cmd::pairs::PairsArgs),

    #[command(
        next_help_heading = "Maintenance",
        about = "Generate shell completion scripts",
        long_about = "Generate shell completion scripts for supported shells.",
        after_help = "EXAMPLES:\n    # Generate bash completions\n    steamgraph completions bash\n\n    # Generate zsh completions\n    steamgraph completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("STEAMGRAPH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "steamgraph=debug,info"
        } else {
            "steamgraph=info,warn"
        })
    });

    let format = env::var("STEAMGRAPH_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Load the project config, rendering a parse failure before bailing.
fn load_config(project_root: &std::path::Path, json: bool) -> anyhow::Result<EffectiveConfig> {
    config::resolve_config(project_root, json).map_err(|err| {
        let fallback = output::resolve_output_mode(json);
        let cli_err = CliError::with_code(format!("{err:#}"), ErrorCode::ConfigParseError);
        if let Err(render_err) = render_error(fallback, &cli_err) {
            tracing::warn!(error = %render_err, "failed to render error");
        }
        err
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        return cmd::completions::run_completions(args.shell, &mut command);
    }

    let project_root = env::current_dir()?;
    let config = load_config(&project_root, cli.json)?;
    let output = OutputMode::from_name(&config.resolved_output)
        .unwrap_or_else(|| output::resolve_output_mode(cli.json));
    debug!(db = %config.db_path.display(), ?output, "resolved config");

    match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, &config, output, &project_root),
        Commands::Import(ref args) => cmd::import::run_import(args, &config, output),
        Commands::Aggregate(ref args) => {
            cmd::aggregate::run_aggregate(args, &config, output, cli.quiet)
        }
        Commands::Reset(ref args) => cmd::reset::run_reset(args, &config, output),
        Commands::Status(ref args) => cmd::status::run_status(args, &config, output),
        Commands::Pairs(ref args) => cmd::pairs::run_pairs(args, &config, output),
        Commands::Completions(_) => Ok(()),
    }
}
