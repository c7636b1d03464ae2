//! Pagure REST client.
//!
//! Pagure serializes instants as epoch seconds, stringly or numeric, and
//! paginates through an opaque `pagination.next` URL. Issues and pull
//! requests use the server-side `author` filter; the git log has none, so
//! one reverse-chronological walk serves every tracked user, matched on the
//! commit author's display name (the API exposes no login association).
//! Anonymous access is valid; the auth header is only sent when a token is
//! configured.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{FetchError, Result};
use crate::forge::{ForgeClient, USER_AGENT, get_json};
use crate::http::{HttpHeaders, with_query};
use crate::model::{ForgeIdentity, RepoActivity, RepoRef, RepoStats, TimeWindow};
use crate::pagination::{PAGE_SIZE, PageStyle, PageWalker, Walk};
use crate::retry::Fetcher;

pub struct PagureClient {
    identity: ForgeIdentity,
    fetcher: Fetcher,
}

/// Epoch seconds out of a field that may be a string, a number, or null.
fn epoch(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn epoch_in(window: TimeWindow, value: Option<&Value>) -> bool {
    epoch(value).is_some_and(|seconds| window.contains_epoch(seconds))
}

impl PagureClient {
    pub fn new(identity: ForgeIdentity, fetcher: Fetcher) -> Self {
        Self { identity, fetcher }
    }

    fn headers(&self) -> HttpHeaders {
        let mut headers = vec![("User-Agent".to_string(), USER_AGENT.to_string())];
        if let Some(token) = &self.identity.token {
            headers.push(("Authorization".to_string(), format!("token {token}")));
        }
        headers
    }

    fn repo_url(&self, repo: &RepoRef, tail: &str) -> String {
        format!("{}/{}/{}", self.identity.base_url, repo.path(), tail)
    }

    fn walker(&self, url: String, items_key: &'static str) -> PageWalker<'_> {
        PageWalker::new(
            &self.fetcher,
            url,
            self.headers(),
            PageStyle::Cursor,
            Some(items_key),
        )
    }

    async fn count_issues(
        &self,
        repo: &RepoRef,
        username: &str,
        window: TimeWindow,
        activity: &mut RepoActivity,
    ) -> Result<Option<FetchError>> {
        let per_page = PAGE_SIZE.to_string();
        let url = with_query(
            &self.repo_url(repo, "issues"),
            &[
                ("status", "all"),
                ("author", username),
                ("per_page", &per_page),
            ],
        );
        let summary = self
            .walker(url, "issues")
            .visit(|item| {
                let stats = activity.user_mut(username);
                if epoch_in(window, item.get("date_created")) {
                    stats.issues_opened += 1;
                }
                if epoch_in(window, item.get("closed_at")) {
                    stats.issues_closed += 1;
                }
                Walk::Continue
            })
            .await?;
        Ok(summary.truncation)
    }

    async fn count_pull_requests(
        &self,
        repo: &RepoRef,
        username: &str,
        window: TimeWindow,
        activity: &mut RepoActivity,
    ) -> Result<Option<FetchError>> {
        let per_page = PAGE_SIZE.to_string();
        let url = with_query(
            &self.repo_url(repo, "pull-requests"),
            &[
                ("status", "all"),
                ("author", username),
                ("per_page", &per_page),
            ],
        );
        let summary = self
            .walker(url, "requests")
            .visit(|item| {
                let stats = activity.user_mut(username);
                if epoch_in(window, item.get("date_created")) {
                    stats.prs_opened += 1;
                }
                if epoch_in(window, item.get("closed_at")) {
                    stats.prs_closed += 1;
                }
                if epoch_in(window, item.get("date_merged")) {
                    stats.prs_merged += 1;
                }
                Walk::Continue
            })
            .await?;
        Ok(summary.truncation)
    }

    async fn count_commits(
        &self,
        repo: &RepoRef,
        usernames: &[String],
        window: TimeWindow,
        activity: &mut RepoActivity,
    ) -> Result<Option<FetchError>> {
        let per_page = PAGE_SIZE.to_string();
        let url = with_query(&self.repo_url(repo, "git/log"), &[("per_page", &per_page)]);
        let start_epoch = window.start().timestamp() as f64;
        let summary = self
            .walker(url, "commits")
            .visit(|item| {
                let time = epoch(item.get("commit_time"));
                // The log is reverse-chronological; past the window start
                // nothing newer follows.
                if time.is_some_and(|t| t < start_epoch) {
                    return Walk::Stop;
                }
                if item
                    .get("parent_ids")
                    .and_then(Value::as_array)
                    .is_some_and(|parents| parents.len() >= 2)
                {
                    return Walk::Continue;
                }
                let Some(author) = item.pointer("/author/name").and_then(Value::as_str) else {
                    return Walk::Continue;
                };
                if !usernames.iter().any(|u| u == author) {
                    return Walk::Continue;
                }
                if time.is_some_and(|t| window.contains_epoch(t)) {
                    activity.user_mut(author).commits += 1;
                }
                Walk::Continue
            })
            .await?;
        Ok(summary.truncation)
    }

    /// List walk plus a detail fetch per item; comments only appear on the
    /// detail payloads.
    async fn count_comments(
        &self,
        repo: &RepoRef,
        list_tail: &str,
        items_key: &'static str,
        detail_tail: &str,
        usernames: &[String],
        window: TimeWindow,
        activity: &mut RepoActivity,
        field: fn(&mut RepoStats) -> &mut u64,
    ) -> Result<Option<FetchError>> {
        let per_page = PAGE_SIZE.to_string();
        let list_url = with_query(
            &self.repo_url(repo, list_tail),
            &[("status", "all"), ("per_page", &per_page)],
        );
        let mut ids = Vec::new();
        let summary = self
            .walker(list_url, items_key)
            .visit(|item| {
                if let Some(id) = item.get("id").and_then(Value::as_u64) {
                    ids.push(id);
                }
                Walk::Continue
            })
            .await?;

        for id in ids {
            let url = self.repo_url(repo, &format!("{detail_tail}/{id}"));
            let body = get_json(&self.fetcher, url, self.headers()).await?;
            let Some(comments) = body.get("comments").and_then(Value::as_array) else {
                continue;
            };
            for comment in comments {
                let Some(author) = comment.pointer("/user/name").and_then(Value::as_str) else {
                    continue;
                };
                if !usernames.iter().any(|u| u == author) {
                    continue;
                }
                if epoch_in(window, comment.get("date_created")) {
                    *field(activity.user_mut(author)) += 1;
                }
            }
        }
        Ok(summary.truncation)
    }
}

#[async_trait]
impl ForgeClient for PagureClient {
    fn name(&self) -> &str {
        &self.identity.name
    }

    async fn repo_stats(
        &self,
        repo: &RepoRef,
        usernames: &[String],
        window: TimeWindow,
    ) -> Result<RepoActivity> {
        let mut activity = RepoActivity::for_users(usernames.iter().map(String::as_str));

        for username in usernames {
            let truncation = self
                .count_issues(repo, username, window, &mut activity)
                .await?;
            activity.record_truncation(truncation);
            let truncation = self
                .count_pull_requests(repo, username, window, &mut activity)
                .await?;
            activity.record_truncation(truncation);
        }

        let truncation = self
            .count_commits(repo, usernames, window, &mut activity)
            .await?;
        activity.record_truncation(truncation);

        let truncation = self
            .count_comments(
                repo,
                "pull-requests",
                "requests",
                "pull-request",
                usernames,
                window,
                &mut activity,
                |s| &mut s.pr_comments,
            )
            .await?;
        activity.record_truncation(truncation);

        let truncation = self
            .count_comments(
                repo,
                "issues",
                "issues",
                "issue",
                usernames,
                window,
                &mut activity,
                |s| &mut s.issue_comments,
            )
            .await?;
        activity.record_truncation(truncation);

        Ok(activity)
    }

    /// Pagure has no activity search; owned projects and forks approximate
    /// it, so the window goes unused.
    async fn discover_repos(
        &self,
        username: &str,
        _window: TimeWindow,
    ) -> Result<BTreeSet<RepoRef>> {
        let url = format!("{}/user/{}", self.identity.base_url, username);
        let body = get_json(&self.fetcher, url, self.headers()).await?;

        let mut repos = BTreeSet::new();
        for key in ["repos", "forks"] {
            let Some(items) = body
                .pointer(&format!("/user/{key}"))
                .and_then(Value::as_array)
            else {
                continue;
            };
            for item in items {
                if let Some(fullname) = item.get("fullname").and_then(Value::as_str) {
                    if !fullname.is_empty() {
                        repos.insert(RepoRef::parse(&self.identity.name, fullname));
                    }
                }
            }
        }
        Ok(repos)
    }
}
