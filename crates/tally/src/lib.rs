//! Tally - per-user contribution stats across code forges.
//!
//! This library fetches and aggregates one window of activity (issues, pull
//! requests, commits, comments) for a set of usernames across GitHub, GitLab,
//! and Pagure instances, tolerating per-repository failures.
//!
//! # Example
//!
//! ```ignore
//! use tally::{ForgeIdentity, ForgeKind, RepoRef, RetryPolicy, TimeWindow};
//! use tally::forge::build_client;
//! use tally::run::{ForgeHandle, RunOptions, aggregate};
//!
//! let window = TimeWindow::calendar_year(2025).unwrap();
//! let identity = ForgeIdentity::new("github", ForgeKind::GitHub, None, token);
//! let client = build_client(identity, transport, RetryPolicy::default(), None);
//!
//! let mut forges = std::collections::BTreeMap::new();
//! forges.insert("github".to_string(), ForgeHandle::new(client, usernames));
//!
//! let repos = vec![RepoRef::parse("github", "rust-lang/rust")];
//! let (report, failures) =
//!     aggregate(&forges, &repos, window, &RunOptions::default(), None).await;
//! ```

pub mod error;
pub mod forge;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod model;
pub mod pagination;
pub mod pagure;
pub mod rate_limit;
pub mod retry;
pub mod run;

pub use error::{FetchError, FetchFailure};
pub use forge::{ForgeClient, build_client};
pub use http::{HttpTransport, reqwest_transport::ReqwestTransport};
pub use model::{
    AggregateReport, ForgeIdentity, ForgeKind, RepoActivity, RepoRef, RepoStats, TimeWindow,
};
pub use rate_limit::ForgeLimiter;
pub use retry::{Fetcher, RetryPolicy};
