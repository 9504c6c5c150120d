//! `steamgraph pairs`: query the shared-reviewer graph.

use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use steamgraph_core::config::EffectiveConfig;
use steamgraph_core::db::pairs::{self, PairCount, Partner};
use steamgraph_core::model::{AppId, AppPair};

use super::{open_store, store_failure};
use crate::output::{CliError, OutputMode, pretty_section, render_error, render_mode};

#[derive(Args, Debug)]
pub struct PairsArgs {
    /// Show the apps sharing the most reviewers with this app.
    #[arg(long, value_name = "APPID")]
    pub app: Option<i64>,

    /// With `--app`, show only the count shared with this app.
    #[arg(long, value_name = "APPID", requires = "app")]
    pub with: Option<i64>,

    /// Maximum rows to list.
    #[arg(long, default_value_t = 20, value_name = "N")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum PairsReport {
    Top { pairs: Vec<PairCount> },
    Partners { appid: AppId, partners: Vec<Partner> },
    Single(PairCount),
}

/// Execute `steamgraph pairs`.
///
/// # Errors
///
/// Returns an error if the store is missing, the query fails, or `--app` and
/// `--with` name the same app.
pub fn run_pairs(args: &PairsArgs, config: &EffectiveConfig, output: OutputMode) -> Result<()> {
    let store = open_store(config, output)?;
    let conn = store.conn();
    let query_failed = |err| store_failure(output, err, "pair query failed");

    let report = match (args.app.map(AppId), args.with.map(AppId)) {
        (Some(app), Some(with)) => {
            let Some(pair) = AppPair::new(app, with) else {
                render_error(output, &CliError::new("--app and --with must name different apps"))?;
                anyhow::bail!("self-pair requested for app {app}");
            };
            let shared_count = pairs::shared_count(conn, pair).map_err(query_failed)?;
            PairsReport::Single(PairCount {
                appid_low: pair.low(),
                appid_high: pair.high(),
                shared_count: shared_count.unwrap_or(0),
            })
        }
        (Some(app), None) => PairsReport::Partners {
            appid: app,
            partners: pairs::top_partners(conn, app, args.limit).map_err(query_failed)?,
        },
        (None, _) => PairsReport::Top {
            pairs: pairs::top_pairs(conn, Some(args.limit)).map_err(query_failed)?,
        },
    };

    render_mode(output, &report, render_text, render_pretty)
}

fn render_text(r: &PairsReport, w: &mut dyn Write) -> io::Result<()> {
    match r {
        PairsReport::Top { pairs } => {
            if !pairs.is_empty() {
                writeln!(w, "APP_LOW  APP_HIGH  SHARED")?;
            }
            for p in pairs {
                writeln!(w, "{}  {}  {}", p.appid_low, p.appid_high, p.shared_count)?;
            }
        }
        PairsReport::Partners { partners, .. } => {
            if !partners.is_empty() {
                writeln!(w, "APP  SHARED")?;
            }
            for p in partners {
                writeln!(w, "{}  {}", p.appid, p.shared_count)?;
            }
        }
        PairsReport::Single(p) => {
            writeln!(w, "{}  {}  {}", p.appid_low, p.appid_high, p.shared_count)?;
        }
    }
    Ok(())
}

fn render_pretty(r: &PairsReport, w: &mut dyn Write) -> io::Result<()> {
    match r {
        PairsReport::Top { pairs } => {
            pretty_section(w, "Top shared-reviewer pairs")?;
            if pairs.is_empty() {
                writeln!(w, "(no pairs yet; run `steamgraph aggregate`)")?;
            }
            for p in pairs {
                writeln!(
                    w,
                    "{:>12} {:>12} {:>10}",
                    p.appid_low, p.appid_high, p.shared_count
                )?;
            }
        }
        PairsReport::Partners { appid, partners } => {
            pretty_section(w, &format!("Apps sharing reviewers with {appid}"))?;
            if partners.is_empty() {
                writeln!(w, "(none)")?;
            }
            for p in partners {
                writeln!(w, "{:>12} {:>10}", p.appid, p.shared_count)?;
            }
        }
        PairsReport::Single(p) => {
            writeln!(
                w,
                "apps {} and {} share {} reviewer(s)",
                p.appid_low, p.appid_high, p.shared_count
            )?;
        }
    }
    Ok(())
}
