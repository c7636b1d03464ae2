//! GitHub REST client.
//!
//! Issues and commits use the server-side `creator`/`author` filters, one
//! walk per tracked username. The pulls list endpoint has no author filter,
//! so a single walk sorted by update recency serves every tracked user,
//! matched on `user.login` client-side. Commit authorship follows GitHub's
//! login association, not the raw git identity.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{FetchError, Result};
use crate::forge::{ForgeClient, USER_AGENT};
use crate::http::{HttpHeaders, with_query};
use crate::model::{ForgeIdentity, RepoActivity, RepoRef, RepoStats, TimeWindow, rfc3339};
use crate::pagination::{PAGE_SIZE, PageStyle, PageWalker, Walk};
use crate::retry::Fetcher;

pub struct GithubClient {
    identity: ForgeIdentity,
    fetcher: Fetcher,
}

#[derive(Debug, Deserialize)]
struct Actor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct IssueItem {
    created_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    /// Present exactly when the item is a pull request.
    pull_request: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PullItem {
    user: Option<Actor>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommitItem {
    commit: CommitDetail,
    #[serde(default)]
    parents: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    committer: Option<CommitSignature>,
}

#[derive(Debug, Deserialize)]
struct CommitSignature {
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommentItem {
    user: Option<Actor>,
    created_at: Option<DateTime<Utc>>,
}

impl GithubClient {
    pub fn new(identity: ForgeIdentity, fetcher: Fetcher) -> Self {
        Self { identity, fetcher }
    }

    fn headers(&self) -> HttpHeaders {
        let mut headers = vec![
            (
                "Accept".to_string(),
                "application/vnd.github+json".to_string(),
            ),
            ("X-GitHub-Api-Version".to_string(), "2022-11-28".to_string()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
        ];
        if let Some(token) = &self.identity.token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers
    }

    fn repo_url(&self, repo: &RepoRef, tail: &str) -> String {
        format!("{}/repos/{}/{}", self.identity.base_url, repo.path(), tail)
    }

    fn walker(&self, url: String, items_key: Option<&'static str>) -> PageWalker<'_> {
        PageWalker::new(
            &self.fetcher,
            url,
            self.headers(),
            PageStyle::LinkHeader,
            items_key,
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
        // `since` filters on update time; the created/closed checks below
        // decide what actually counts.
        let url = with_query(
            &self.repo_url(repo, "issues"),
            &[
                ("creator", username),
                ("state", "all"),
                ("since", &rfc3339(window.start())),
                ("per_page", &per_page),
            ],
        );
        let summary = self
            .walker(url, None)
            .visit(|item| {
                let Ok(issue) = IssueItem::deserialize(item) else {
                    return Walk::Continue;
                };
                // The issues list interleaves pull requests; those are
                // counted from the pulls walk.
                if issue.pull_request.is_some() {
                    return Walk::Continue;
                }
                let stats = activity.user_mut(username);
                if issue.created_at.is_some_and(|at| window.contains(at)) {
                    stats.issues_opened += 1;
                }
                if issue.closed_at.is_some_and(|at| window.contains(at)) {
                    stats.issues_closed += 1;
                }
                Walk::Continue
            })
            .await?;
        Ok(summary.truncation)
    }

    async fn count_pulls(
        &self,
        repo: &RepoRef,
        usernames: &[String],
        window: TimeWindow,
        activity: &mut RepoActivity,
    ) -> Result<Option<FetchError>> {
        let per_page = PAGE_SIZE.to_string();
        let url = with_query(
            &self.repo_url(repo, "pulls"),
            &[
                ("state", "all"),
                ("sort", "updated"),
                ("direction", "desc"),
                ("per_page", &per_page),
            ],
        );
        let summary = self
            .walker(url, None)
            .visit(|item| {
                let Ok(pull) = PullItem::deserialize(item) else {
                    return Walk::Continue;
                };
                // Update-sorted descending: nothing past this point can
                // still touch the window.
                if pull.updated_at.is_some_and(|at| at < window.start()) {
                    return Walk::Stop;
                }
                let Some(login) = pull.user.as_ref().map(|a| a.login.as_str()) else {
                    return Walk::Continue;
                };
                if !usernames.iter().any(|u| u == login) {
                    return Walk::Continue;
                }
                let stats = activity.user_mut(login);
                if pull.created_at.is_some_and(|at| window.contains(at)) {
                    stats.prs_opened += 1;
                }
                if pull.closed_at.is_some_and(|at| window.contains(at)) {
                    stats.prs_closed += 1;
                }
                if pull.merged_at.is_some_and(|at| window.contains(at)) {
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
        username: &str,
        window: TimeWindow,
        activity: &mut RepoActivity,
    ) -> Result<Option<FetchError>> {
        let per_page = PAGE_SIZE.to_string();
        let url = with_query(
            &self.repo_url(repo, "commits"),
            &[
                ("author", username),
                ("since", &rfc3339(window.start())),
                ("until", &rfc3339(window.end())),
                ("per_page", &per_page),
            ],
        );
        let summary = self
            .walker(url, None)
            .visit(|item| {
                let Ok(entry) = CommitItem::deserialize(item) else {
                    return Walk::Continue;
                };
                if entry.parents.len() >= 2 {
                    return Walk::Continue;
                }
                let committed = entry.commit.committer.as_ref().and_then(|c| c.date);
                if committed.is_some_and(|at| window.contains(at)) {
                    activity.user_mut(username).commits += 1;
                }
                Walk::Continue
            })
            .await?;
        Ok(summary.truncation)
    }

    /// One repo-wide walk buckets all tracked users at once.
    async fn count_comments(
        &self,
        url: String,
        usernames: &[String],
        window: TimeWindow,
        activity: &mut RepoActivity,
        field: fn(&mut RepoStats) -> &mut u64,
    ) -> Result<Option<FetchError>> {
        let per_page = PAGE_SIZE.to_string();
        let url = with_query(
            &url,
            &[("since", &rfc3339(window.start())), ("per_page", &per_page)],
        );
        let summary = self
            .walker(url, None)
            .visit(|item| {
                let Ok(comment) = CommentItem::deserialize(item) else {
                    return Walk::Continue;
                };
                let Some(login) = comment.user.as_ref().map(|a| a.login.as_str()) else {
                    return Walk::Continue;
                };
                if !usernames.iter().any(|u| u == login) {
                    return Walk::Continue;
                }
                if comment.created_at.is_some_and(|at| window.contains(at)) {
                    *field(activity.user_mut(login)) += 1;
                }
                Walk::Continue
            })
            .await?;
        Ok(summary.truncation)
    }
}

#[async_trait]
impl ForgeClient for GithubClient {
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
                .count_commits(repo, username, window, &mut activity)
                .await?;
            activity.record_truncation(truncation);
        }

        let truncation = self
            .count_pulls(repo, usernames, window, &mut activity)
            .await?;
        activity.record_truncation(truncation);

        let truncation = self
            .count_comments(
                self.repo_url(repo, "issues/comments"),
                usernames,
                window,
                &mut activity,
                |s| &mut s.issue_comments,
            )
            .await?;
        activity.record_truncation(truncation);
        let truncation = self
            .count_comments(
                self.repo_url(repo, "pulls/comments"),
                usernames,
                window,
                &mut activity,
                |s| &mut s.pr_comments,
            )
            .await?;
        activity.record_truncation(truncation);

        Ok(activity)
    }

    async fn discover_repos(
        &self,
        username: &str,
        window: TimeWindow,
    ) -> Result<BTreeSet<RepoRef>> {
        let per_page = PAGE_SIZE.to_string();
        let range = search_range(window);
        let mut repos = BTreeSet::new();

        for query in [
            format!("author:{username} created:{range}"),
            format!("commenter:{username} updated:{range}"),
        ] {
            let url = with_query(
                &format!("{}/search/issues", self.identity.base_url),
                &[("q", &query), ("per_page", &per_page)],
            );
            let summary = self
                .walker(url, Some("items"))
                .visit(|item| {
                    let repo = item
                        .get("repository_url")
                        .and_then(Value::as_str)
                        .and_then(|u| repo_from_api_url(u, &self.identity.name));
                    if let Some(repo) = repo {
                        repos.insert(repo);
                    }
                    Walk::Continue
                })
                .await?;
            if let Some(truncation) = summary.truncation {
                tracing::warn!(
                    forge = %self.identity.name,
                    username,
                    %truncation,
                    "discovery walk truncated"
                );
            }
        }

        Ok(repos)
    }
}

/// Day-granular `from..to` search range, both ends inclusive.
fn search_range(window: TimeWindow) -> String {
    let last = window.end() - chrono::Duration::seconds(1);
    format!("{}..{}", window.start().date_naive(), last.date_naive())
}

/// Owner and name out of `https://api.github.com/repos/{owner}/{name}`.
fn repo_from_api_url(url: &str, forge: &str) -> Option<RepoRef> {
    let (_, path) = url.split_once("/repos/")?;
    let (owner, name) = path.split_once('/')?;
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    Some(RepoRef::new(forge, owner, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::http::{HttpResponse, MockTransport, header_get};
    use crate::model::ForgeKind;
    use crate::rate_limit::ForgeLimiter;
    use crate::retry::RetryPolicy;

    const BASE: &str = "https://api.github.test";
    const SINCE: &str = "2025-01-01T00%3A00%3A00Z";
    const UNTIL: &str = "2026-01-01T00%3A00%3A00Z";

    fn window() -> TimeWindow {
        TimeWindow::calendar_year(2025).expect("valid year")
    }

    fn client(mock: &MockTransport, token: Option<&str>) -> GithubClient {
        GithubClient::new(
            ForgeIdentity::new(
                "github",
                ForgeKind::GitHub,
                Some(BASE.to_string()),
                token.map(String::from),
            ),
            Fetcher::new(
                Arc::new(mock.clone()),
                ForgeLimiter::new(1000),
                RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 0),
                "github",
            ),
        )
    }

    fn repo() -> RepoRef {
        RepoRef::new("github", "acme", "widget")
    }

    fn issues_url(user: &str) -> String {
        format!(
            "{BASE}/repos/acme/widget/issues?creator={user}&state=all&since={SINCE}&per_page=100"
        )
    }

    fn pulls_url() -> String {
        format!("{BASE}/repos/acme/widget/pulls?state=all&sort=updated&direction=desc&per_page=100")
    }

    fn commits_url(user: &str) -> String {
        format!(
            "{BASE}/repos/acme/widget/commits?author={user}&since={SINCE}&until={UNTIL}&per_page=100"
        )
    }

    fn issue_comments_url() -> String {
        format!("{BASE}/repos/acme/widget/issues/comments?since={SINCE}&per_page=100")
    }

    fn pr_comments_url() -> String {
        format!("{BASE}/repos/acme/widget/pulls/comments?since={SINCE}&per_page=100")
    }

    #[tokio::test]
    async fn repo_stats_buckets_every_counter() {
        let mock = MockTransport::new();
        mock.push_json(
            issues_url("alice"),
            r#"[
                {"created_at": "2025-03-01T12:00:00Z", "closed_at": null},
                {"created_at": "2024-11-05T09:00:00Z", "closed_at": "2025-02-01T10:00:00Z"},
                {"created_at": "2025-04-01T00:00:00Z", "closed_at": null, "pull_request": {"url": "x"}}
            ]"#,
        );
        mock.push_json(issues_url("bob"), "[]");
        mock.push_json(
            commits_url("alice"),
            r#"[
                {"commit": {"committer": {"date": "2025-06-01T08:00:00Z"}}, "parents": [{"sha": "a"}]},
                {"commit": {"committer": {"date": "2025-06-02T08:00:00Z"}}, "parents": [{"sha": "a"}, {"sha": "b"}]},
                {"commit": {"committer": {"date": "2024-12-31T23:59:59Z"}}, "parents": []}
            ]"#,
        );
        mock.push_json(commits_url("bob"), "[]");
        mock.push_json(
            pulls_url(),
            r#"[
                {"user": {"login": "alice"}, "created_at": "2025-05-01T00:00:00Z", "updated_at": "2025-07-01T00:00:00Z", "closed_at": "2025-06-15T00:00:00Z", "merged_at": "2025-06-15T00:00:00Z"},
                {"user": {"login": "alice"}, "created_at": "2025-05-02T00:00:00Z", "updated_at": "2025-05-02T00:00:00Z", "closed_at": null, "merged_at": null},
                {"user": {"login": "mallory"}, "created_at": "2025-05-03T00:00:00Z", "updated_at": "2025-05-03T00:00:00Z", "closed_at": null, "merged_at": null}
            ]"#,
        );
        mock.push_json(
            issue_comments_url(),
            r#"[
                {"user": {"login": "alice"}, "created_at": "2025-08-01T00:00:00Z"},
                {"user": {"login": "mallory"}, "created_at": "2025-08-01T00:00:00Z"}
            ]"#,
        );
        mock.push_json(
            pr_comments_url(),
            r#"[{"user": {"login": "bob"}, "created_at": "2025-09-01T00:00:00Z"}]"#,
        );

        let client = client(&mock, None);
        let usernames = vec!["alice".to_string(), "bob".to_string()];
        let activity = client
            .repo_stats(&repo(), &usernames, window())
            .await
            .expect("stats should succeed");

        let alice = &activity.per_user["alice"];
        assert_eq!(alice.issues_opened, 1);
        assert_eq!(alice.issues_closed, 1);
        assert_eq!(alice.prs_opened, 2);
        assert_eq!(alice.prs_closed, 1);
        assert_eq!(alice.prs_merged, 1);
        assert_eq!(alice.commits, 1);
        assert_eq!(alice.issue_comments, 1);
        assert_eq!(alice.pr_comments, 0);

        let bob = &activity.per_user["bob"];
        assert_eq!(bob.pr_comments, 1);
        assert_eq!(bob.total(), 1);

        assert!(!activity.per_user.contains_key("mallory"));
        assert!(activity.truncation.is_none());
    }

    #[tokio::test]
    async fn window_boundaries_are_half_open() {
        let mock = MockTransport::new();
        mock.push_json(
            issues_url("alice"),
            r#"[
                {"created_at": "2025-01-01T00:00:00Z", "closed_at": null},
                {"created_at": "2026-01-01T00:00:00Z", "closed_at": null}
            ]"#,
        );
        mock.push_json(commits_url("alice"), "[]");
        mock.push_json(pulls_url(), "[]");
        mock.push_json(issue_comments_url(), "[]");
        mock.push_json(pr_comments_url(), "[]");

        let client = client(&mock, None);
        let activity = client
            .repo_stats(&repo(), &["alice".to_string()], window())
            .await
            .expect("stats should succeed");
        assert_eq!(activity.per_user["alice"].issues_opened, 1);
    }

    #[tokio::test]
    async fn pulls_walk_stops_once_updates_predate_the_window() {
        let mock = MockTransport::new();
        let next = format!("{}&page=2", pulls_url());
        mock.push_json(issues_url("alice"), "[]");
        mock.push_json(commits_url("alice"), "[]");
        // Page 2 is never registered: touching it fails the whole unit.
        mock.push_response(
            pulls_url(),
            HttpResponse {
                status: 200,
                headers: vec![("Link".to_string(), format!(r#"<{next}>; rel="next""#))],
                body: br#"[
                    {"user": {"login": "alice"}, "created_at": "2025-05-01T00:00:00Z", "updated_at": "2025-05-01T00:00:00Z", "closed_at": null, "merged_at": null},
                    {"user": {"login": "alice"}, "created_at": "2024-02-01T00:00:00Z", "updated_at": "2024-02-01T00:00:00Z", "closed_at": null, "merged_at": null}
                ]"#
                .to_vec(),
            },
        );
        mock.push_json(issue_comments_url(), "[]");
        mock.push_json(pr_comments_url(), "[]");

        let client = client(&mock, None);
        let activity = client
            .repo_stats(&repo(), &["alice".to_string()], window())
            .await
            .expect("stats should succeed");
        assert_eq!(activity.per_user["alice"].prs_opened, 1);
        assert!(mock.requests().iter().all(|r| r.url != next));
    }

    #[tokio::test]
    async fn requests_carry_github_headers_and_bearer_token() {
        let mock = MockTransport::new();
        mock.push_json(issues_url("alice"), "[]");
        mock.push_json(commits_url("alice"), "[]");
        mock.push_json(pulls_url(), "[]");
        mock.push_json(issue_comments_url(), "[]");
        mock.push_json(pr_comments_url(), "[]");

        let client = client(&mock, Some("ghp_token123"));
        client
            .repo_stats(&repo(), &["alice".to_string()], window())
            .await
            .expect("stats should succeed");

        let requests = mock.requests();
        assert_eq!(requests.len(), 5);
        for request in &requests {
            assert_eq!(
                header_get(&request.headers, "accept"),
                Some("application/vnd.github+json")
            );
            assert_eq!(
                header_get(&request.headers, "x-github-api-version"),
                Some("2022-11-28")
            );
            assert_eq!(
                header_get(&request.headers, "authorization"),
                Some("Bearer ghp_token123")
            );
            assert!(header_get(&request.headers, "user-agent").is_some());
        }
    }

    #[tokio::test]
    async fn missing_repo_surfaces_not_found() {
        let mock = MockTransport::new();
        mock.push_status(issues_url("alice"), 404);

        let client = client(&mock, None);
        let err = client
            .repo_stats(&repo(), &["alice".to_string()], window())
            .await
            .expect_err("missing repo must fail");
        assert!(matches!(err, FetchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn discovery_unions_author_and_commenter_hits() {
        let mock = MockTransport::new();
        let author_url = with_query(
            &format!("{BASE}/search/issues"),
            &[
                ("q", "author:alice created:2025-01-01..2025-12-31"),
                ("per_page", "100"),
            ],
        );
        let commenter_url = with_query(
            &format!("{BASE}/search/issues"),
            &[
                ("q", "commenter:alice updated:2025-01-01..2025-12-31"),
                ("per_page", "100"),
            ],
        );
        mock.push_json(
            author_url,
            &format!(
                r#"{{"total_count": 1, "items": [{{"repository_url": "{BASE}/repos/acme/widget"}}]}}"#
            ),
        );
        mock.push_json(
            commenter_url,
            &format!(
                r#"{{"total_count": 2, "items": [{{"repository_url": "{BASE}/repos/acme/gadget"}}, {{"repository_url": "{BASE}/repos/acme/widget"}}]}}"#
            ),
        );

        let client = client(&mock, None);
        let repos = client
            .discover_repos("alice", window())
            .await
            .expect("discovery should succeed");
        let paths: Vec<String> = repos.iter().map(|r| r.path()).collect();
        assert_eq!(paths, vec!["acme/gadget", "acme/widget"]);
    }

    #[test]
    fn search_range_is_day_granular_and_inclusive() {
        assert_eq!(search_range(window()), "2025-01-01..2025-12-31");
    }

    #[test]
    fn repo_from_api_url_parses_the_repos_path() {
        let parsed = repo_from_api_url("https://api.github.com/repos/acme/widget", "github")
            .expect("should parse");
        assert_eq!(parsed, RepoRef::new("github", "acme", "widget"));
        assert!(repo_from_api_url("https://api.github.com/users/acme", "github").is_none());
    }
}
