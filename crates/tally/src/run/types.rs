//! Shared run types and constants.

use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchFailure;
use crate::forge::ForgeClient;
use crate::model::{RepoActivity, RepoRef};

/// Default number of fetch units in flight across all forges.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default number of fetch units in flight against any single forge.
pub const DEFAULT_PER_FORGE_CONCURRENCY: usize = 4;

/// Options for one aggregation or discovery run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Upper bound on units in flight across all forges.
    pub concurrency: usize,
    /// Upper bound on units in flight against any single forge.
    pub per_forge_concurrency: usize,
    /// Wall-clock budget for the whole run. In-flight units are cancelled
    /// when it expires; finished results are kept.
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            per_forge_concurrency: DEFAULT_PER_FORGE_CONCURRENCY,
            timeout: None,
        }
    }
}

/// One configured forge as the engines see it: the client plus the usernames
/// tracked on that forge.
#[derive(Clone)]
pub struct ForgeHandle {
    pub client: Arc<dyn ForgeClient>,
    pub usernames: Vec<String>,
}

impl ForgeHandle {
    pub fn new(client: Arc<dyn ForgeClient>, usernames: Vec<String>) -> Self {
        Self { client, usernames }
    }
}

/// Value-based outcome of one (forge, repo) fetch unit.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Stats for one repository. `activity.truncation` is set when a
    /// pagination walk hit its safety bound and the counts are partial.
    Stats {
        repo: RepoRef,
        activity: RepoActivity,
    },
    /// The unit produced nothing.
    Failed(FetchFailure),
}
