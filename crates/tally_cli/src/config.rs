//! Configuration file support for tally.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `TALLY_`, e.g., `TALLY_YEAR`)
//! 3. Config file (~/.config/tally/config.toml or ./tally.toml)
//!
//! An explicit `--config <path>` replaces the file lookup entirely; the
//! environment still applies on top of it.
//!
//! Example config file:
//! ```toml
//! year = 2025                 # or [window] with start/end timestamps
//! output = "report-2025.md"   # optional
//!
//! [run]
//! concurrency = 10
//! per_forge_concurrency = 4
//! timeout_secs = 900
//!
//! [[forge]]
//! kind = "github"             # github | gitlab | pagure
//! name = "github"             # optional, defaults to the kind
//! base_url = "https://api.github.com"   # optional, per-kind default
//! token = "$GITHUB_TOKEN"     # $VAR / ${VAR} reads the environment
//! usernames = ["alice"]
//! repos = ["acme/widget"]
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use tally::run::{DEFAULT_CONCURRENCY, DEFAULT_PER_FORGE_CONCURRENCY, RunOptions};
use tally::{ForgeIdentity, ForgeKind, RepoRef, TimeWindow};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration load failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error("set exactly one of `year` or `[window]`")]
    WindowChoice,

    #[error("year {0} is out of range (2000..=9999)")]
    YearRange(i32),

    #[error("window start must be before end")]
    WindowOrder,

    #[error("no forges configured")]
    NoForges,

    #[error("duplicate forge name `{0}`")]
    DuplicateForge(String),

    #[error("forge `{0}` has no usernames")]
    NoUsernames(String),
}

/// Raw deserialization target for the layered sources.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub year: Option<i32>,
    pub window: Option<WindowConfig>,
    pub output: Option<String>,
    pub run: RunConfig,
    pub forge: Vec<ForgeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Engine knobs, all optional in the file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub concurrency: usize,
    pub per_forge_concurrency: usize,
    pub timeout_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            per_forge_concurrency: DEFAULT_PER_FORGE_CONCURRENCY,
            timeout_secs: None,
        }
    }
}

/// One `[[forge]]` entry as written in the file.
#[derive(Debug, Deserialize)]
pub struct ForgeConfig {
    pub kind: ForgeKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub repos: Vec<String>,
}

/// Validated configuration as the commands consume it.
#[derive(Debug)]
pub struct Config {
    pub window: TimeWindow,
    pub output: Option<String>,
    pub options: RunOptions,
    pub forges: Vec<ForgeEntry>,
}

/// One resolved forge: identity (name, base URL, token) plus the usernames
/// tracked there and the repos listed in the file.
#[derive(Debug)]
pub struct ForgeEntry {
    pub identity: ForgeIdentity,
    pub usernames: Vec<String>,
    pub repos: Vec<RepoRef>,
}

/// Load and validate configuration.
///
/// `explicit` replaces the XDG and local file layers; the `TALLY_`
/// environment applies either way. `.env` is loaded by `main` before this
/// runs.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut builder = ConfigBuilder::builder();

    match explicit {
        Some(path) => {
            builder = builder.add_source(File::from(path.to_path_buf()).format(FileFormat::Toml));
        }
        None => {
            if let Some(proj_dirs) = ProjectDirs::from("", "", "tally") {
                let xdg_config = proj_dirs.config_dir().join("config.toml");
                if xdg_config.exists() {
                    tracing::debug!("loading config from {:?}", xdg_config);
                    builder = builder.add_source(
                        File::from(xdg_config)
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }

            let local_config = PathBuf::from("tally.toml");
            if local_config.exists() {
                tracing::debug!("loading config from ./tally.toml");
                builder = builder.add_source(
                    File::from(local_config)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("TALLY")
            .separator("_")
            .try_parsing(true),
    );

    let raw: FileConfig = builder.build()?.try_deserialize()?;
    raw.resolve()
}

impl FileConfig {
    /// Validate and resolve the raw file shape.
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let window = match (self.year, &self.window) {
            (Some(year), None) => year_window(year)?,
            (None, Some(w)) => {
                if w.start >= w.end {
                    return Err(ConfigError::WindowOrder);
                }
                TimeWindow::new(w.start, w.end)
            }
            _ => return Err(ConfigError::WindowChoice),
        };

        if self.forge.is_empty() {
            return Err(ConfigError::NoForges);
        }

        let mut names = BTreeSet::new();
        let mut forges = Vec::with_capacity(self.forge.len());
        for entry in self.forge {
            let name = entry
                .name
                .clone()
                .unwrap_or_else(|| entry.kind.as_str().to_string());
            if !names.insert(name.clone()) {
                return Err(ConfigError::DuplicateForge(name));
            }
            if entry.usernames.is_empty() {
                return Err(ConfigError::NoUsernames(name));
            }

            let token = entry.token.as_deref().and_then(resolve_token);
            let identity = ForgeIdentity::new(name.clone(), entry.kind, entry.base_url, token);
            let repos = entry
                .repos
                .iter()
                .map(|path| RepoRef::parse(name.as_str(), path))
                .collect();
            forges.push(ForgeEntry {
                identity,
                usernames: entry.usernames,
                repos,
            });
        }

        let options = RunOptions {
            concurrency: self.run.concurrency,
            per_forge_concurrency: self.run.per_forge_concurrency,
            timeout: self.run.timeout_secs.map(Duration::from_secs),
        };

        Ok(Config {
            window,
            output: self.output,
            options,
            forges,
        })
    }
}

/// The calendar-year window for `year`.
///
/// A year still in progress ends at the current instant; activity cannot
/// postdate now.
pub fn year_window(year: i32) -> Result<TimeWindow, ConfigError> {
    if !(2000..=9999).contains(&year) {
        return Err(ConfigError::YearRange(year));
    }
    let window = TimeWindow::calendar_year(year).ok_or(ConfigError::YearRange(year))?;
    let now = Utc::now();
    if window.contains(now) {
        return Ok(TimeWindow::new(window.start(), now));
    }
    Ok(window)
}

/// `$VAR` / `${VAR}` reads the environment; an unset or empty variable makes
/// the token absent rather than a literal dollar string. Anything else
/// passes through verbatim.
fn resolve_token(raw: &str) -> Option<String> {
    if let Some(var) = raw.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
        return std::env::var(var).ok().filter(|v| !v.is_empty());
    }
    if let Some(var) = raw.strip_prefix('$') {
        return std::env::var(var).ok().filter(|v| !v.is_empty());
    }
    Some(raw.to_string())
}
