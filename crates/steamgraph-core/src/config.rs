use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding the store, config, and lock files.
pub const STATE_DIR: &str = ".steamgraph";

/// Environment variable overriding the database path.
pub const DB_ENV: &str = "STEAMGRAPH_DB";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub aggregate: AggregateConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database file, relative to `.steamgraph/` unless absolute.
    #[serde(default = "default_db_file")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_file(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// How long `aggregate` and `reset` wait for the run lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Log a progress line every this many reviewers. `0` disables it.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            progress_every: default_progress_every(),
        }
    }
}

impl AggregateConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub db_path: PathBuf,
    pub lock_path: PathBuf,
    pub resolved_output: String,
}

pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join("config.toml")
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write the default config unless one already exists. Returns `true` when a
/// file was written.
pub fn write_default_config(project_root: &Path) -> Result<bool> {
    let path = config_path(project_root);
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let content = toml::to_string_pretty(&ProjectConfig::default())
        .context("Failed to serialize default config")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;

    let env_db = env::var_os(DB_ENV).map(PathBuf::from);
    let db_path = resolve_db_path(project_root, &project.store, env_db);
    let lock_path = project_root.join(STATE_DIR).join("aggregate.lock");

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, project.output.clone(), env_format)?;

    Ok(EffectiveConfig {
        project,
        db_path,
        lock_path,
        resolved_output,
    })
}

fn resolve_db_path(project_root: &Path, store: &StoreConfig, env_db: Option<PathBuf>) -> PathBuf {
    if let Some(path) = env_db.filter(|p| !p.as_os_str().is_empty()) {
        return path;
    }
    if store.path.is_absolute() {
        store.path.clone()
    } else {
        project_root.join(STATE_DIR).join(&store.path)
    }
}

fn resolve_output(
    cli_json: bool,
    config_output: Option<String>,
    env_format: Option<String>,
) -> Result<String> {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return Ok("json".to_string());
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return Ok(mode.to_string());
    }

    if let Some(mode) = config_output.as_deref().and_then(normalize_output_mode) {
        return Ok(mode.to_string());
    }

    if std::io::stdout().is_terminal() {
        Ok("pretty".to_string())
    } else {
        Ok("text".to_string())
    }
}

fn default_db_file() -> PathBuf {
    PathBuf::from("steamgraph.db")
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_lock_timeout_ms() -> u64 {
    1_000
}

const fn default_progress_every() -> usize {
    1_000
}
