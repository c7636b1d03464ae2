//! Forge-agnostic trait for activity clients.
//!
//! Each configured forge instance gets one client implementing
//! [`ForgeClient`]; the engines in [`crate::run`] depend only on the trait
//! object and never branch on forge identity.
//!
//! # Implementation Notes
//!
//! Implementors should:
//! - Handle pagination internally via [`crate::pagination::PageWalker`]
//! - Route every request through their [`Fetcher`] so pacing and retry apply
//! - Compare every timestamp against the [`TimeWindow`] before counting,
//!   whatever server-side filters the query already carried
//! - Keep credentials in request headers only

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{FetchError, Result};
use crate::github::GithubClient;
use crate::gitlab::GitlabClient;
use crate::http::{HttpHeaders, HttpRequest, HttpTransport};
use crate::model::{ForgeIdentity, ForgeKind, RepoActivity, RepoRef, TimeWindow};
use crate::pagure::PagureClient;
use crate::rate_limit::ForgeLimiter;
use crate::retry::{Fetcher, RetryPolicy};
use crate::run::progress::ProgressCallback;

/// Sent with every request; reqwest adds no default.
pub(crate) const USER_AGENT: &str = concat!("tally/", env!("CARGO_PKG_VERSION"));

/// Read-only window onto one forge's activity.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    /// Configured instance name, used to key results and log lines.
    fn name(&self) -> &str;

    /// Count window-bounded activity in one repository, per tracked username.
    ///
    /// Returns a row for every username even with zero activity. A pagination
    /// walk that hit its safety bound leaves partial counts plus a truncation
    /// marker rather than failing the unit.
    async fn repo_stats(
        &self,
        repo: &RepoRef,
        usernames: &[String],
        window: TimeWindow,
    ) -> Result<RepoActivity>;

    /// Enumerate repositories `username` touched during the window.
    async fn discover_repos(
        &self,
        username: &str,
        window: TimeWindow,
    ) -> Result<BTreeSet<RepoRef>>;
}

/// Build the client matching the identity's kind.
///
/// The client owns a [`Fetcher`] seeded with the kind's default request rate,
/// so pacing state is per instance from the start.
pub fn build_client(
    identity: ForgeIdentity,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    on_progress: Option<Arc<ProgressCallback>>,
) -> Arc<dyn ForgeClient> {
    let limiter = ForgeLimiter::for_kind(identity.kind);
    let fetcher = Fetcher::new(transport, limiter, policy, identity.name.clone())
        .with_progress(on_progress);
    match identity.kind {
        ForgeKind::GitHub => Arc::new(GithubClient::new(identity, fetcher)),
        ForgeKind::GitLab => Arc::new(GitlabClient::new(identity, fetcher)),
        ForgeKind::Pagure => Arc::new(PagureClient::new(identity, fetcher)),
    }
}

/// One unpaginated GET returning a JSON body.
pub(crate) async fn get_json(
    fetcher: &Fetcher,
    url: String,
    headers: HttpHeaders,
) -> Result<Value> {
    let request = HttpRequest { url, headers };
    let response = fetcher.execute(&request).await?;
    serde_json::from_slice(&response.body)
        .map_err(|e| FetchError::network(format!("invalid json body: {e}")))
}
