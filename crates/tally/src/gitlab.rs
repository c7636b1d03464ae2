//! GitLab REST client.
//!
//! Projects are addressed by URL-encoded path, so no id lookup round-trip is
//! needed. Issues, merge requests, and commits use server-side author filters
//! per tracked username; notes have no author filter, so one unfiltered walk
//! feeds per-item `notes` fetches bucketed client-side. Commit authorship
//! follows GitLab's `author` parameter, which matches the commit author name
//! or email rather than a login.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{FetchError, Result};
use crate::forge::{ForgeClient, USER_AGENT, get_json};
use crate::http::{HttpHeaders, with_query};
use crate::model::{ForgeIdentity, RepoActivity, RepoRef, RepoStats, TimeWindow, rfc3339};
use crate::pagination::{PAGE_SIZE, PageStyle, PageWalker, Walk};
use crate::retry::Fetcher;

pub struct GitlabClient {
    identity: ForgeIdentity,
    fetcher: Fetcher,
}

#[derive(Debug, Deserialize)]
struct IssueItem {
    created_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct MergeRequestItem {
    created_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommitItem {
    committed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    parent_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListedItem {
    iid: u64,
}

#[derive(Debug, Deserialize)]
struct NoteItem {
    author: Option<NoteAuthor>,
    /// True for state-change chatter ("changed the description", ...).
    #[serde(default)]
    system: bool,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct NoteAuthor {
    username: String,
}

#[derive(Debug, Deserialize)]
struct EventItem {
    project_id: Option<u64>,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ProjectItem {
    path_with_namespace: String,
}

impl GitlabClient {
    pub fn new(identity: ForgeIdentity, fetcher: Fetcher) -> Self {
        Self { identity, fetcher }
    }

    fn headers(&self) -> HttpHeaders {
        let mut headers = vec![("User-Agent".to_string(), USER_AGENT.to_string())];
        if let Some(token) = &self.identity.token {
            headers.push(("PRIVATE-TOKEN".to_string(), token.clone()));
        }
        headers
    }

    fn project_url(&self, repo: &RepoRef, tail: &str) -> String {
        format!(
            "{}/projects/{}{}",
            self.identity.base_url,
            urlencoding::encode(&repo.path()),
            tail
        )
    }

    fn walker(&self, url: String) -> PageWalker<'_> {
        PageWalker::new(
            &self.fetcher,
            url,
            self.headers(),
            PageStyle::PageNumber,
            None,
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
        // `updated_after` narrows the walk; anything closed in the window was
        // necessarily updated after its start.
        let url = with_query(
            &self.project_url(repo, "/issues"),
            &[
                ("author_username", username),
                ("updated_after", &rfc3339(window.start())),
                ("per_page", &per_page),
            ],
        );
        let summary = self
            .walker(url)
            .visit(|item| {
                let Ok(issue) = IssueItem::deserialize(item) else {
                    return Walk::Continue;
                };
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

    async fn count_merge_requests(
        &self,
        repo: &RepoRef,
        username: &str,
        window: TimeWindow,
        activity: &mut RepoActivity,
    ) -> Result<Option<FetchError>> {
        let per_page = PAGE_SIZE.to_string();
        let url = with_query(
            &self.project_url(repo, "/merge_requests"),
            &[
                ("author_username", username),
                ("state", "all"),
                ("updated_after", &rfc3339(window.start())),
                ("per_page", &per_page),
            ],
        );
        let summary = self
            .walker(url)
            .visit(|item| {
                let Ok(mr) = MergeRequestItem::deserialize(item) else {
                    return Walk::Continue;
                };
                let stats = activity.user_mut(username);
                if mr.created_at.is_some_and(|at| window.contains(at)) {
                    stats.prs_opened += 1;
                }
                if mr.closed_at.is_some_and(|at| window.contains(at)) {
                    stats.prs_closed += 1;
                }
                if mr.merged_at.is_some_and(|at| window.contains(at)) {
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
            &self.project_url(repo, "/repository/commits"),
            &[
                ("author", username),
                ("since", &rfc3339(window.start())),
                ("until", &rfc3339(window.end())),
                ("per_page", &per_page),
            ],
        );
        let summary = self
            .walker(url)
            .visit(|item| {
                let Ok(commit) = CommitItem::deserialize(item) else {
                    return Walk::Continue;
                };
                if commit.parent_ids.len() >= 2 {
                    return Walk::Continue;
                }
                if commit
                    .committed_date
                    .is_some_and(|at| window.contains(at))
                {
                    activity.user_mut(username).commits += 1;
                }
                Walk::Continue
            })
            .await?;
        Ok(summary.truncation)
    }

    /// Walk one unfiltered list, then each item's notes, bucketing every
    /// tracked user in a single pass.
    async fn count_notes(
        &self,
        list_url: String,
        notes_path: &str,
        repo: &RepoRef,
        usernames: &[String],
        window: TimeWindow,
        activity: &mut RepoActivity,
        field: fn(&mut RepoStats) -> &mut u64,
    ) -> Result<Option<FetchError>> {
        let mut iids = Vec::new();
        let summary = self
            .walker(list_url)
            .visit(|item| {
                if let Ok(listed) = ListedItem::deserialize(item) {
                    iids.push(listed.iid);
                }
                Walk::Continue
            })
            .await?;
        let mut truncation = summary.truncation;

        let per_page = PAGE_SIZE.to_string();
        for iid in iids {
            let url = with_query(
                &self.project_url(repo, &format!("/{notes_path}/{iid}/notes")),
                &[("per_page", &per_page)],
            );
            let summary = self
                .walker(url)
                .visit(|item| {
                    let Ok(note) = NoteItem::deserialize(item) else {
                        return Walk::Continue;
                    };
                    if note.system {
                        return Walk::Continue;
                    }
                    let Some(author) = note.author.as_ref().map(|a| a.username.as_str()) else {
                        return Walk::Continue;
                    };
                    if !usernames.iter().any(|u| u == author) {
                        return Walk::Continue;
                    }
                    if note.created_at.is_some_and(|at| window.contains(at)) {
                        *field(activity.user_mut(author)) += 1;
                    }
                    Walk::Continue
                })
                .await?;
            if truncation.is_none() {
                truncation = summary.truncation;
            }
        }
        Ok(truncation)
    }
}

#[async_trait]
impl ForgeClient for GitlabClient {
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
                .count_merge_requests(repo, username, window, &mut activity)
                .await?;
            activity.record_truncation(truncation);
            let truncation = self
                .count_commits(repo, username, window, &mut activity)
                .await?;
            activity.record_truncation(truncation);
        }

        let per_page = PAGE_SIZE.to_string();
        let mr_list = with_query(
            &self.project_url(repo, "/merge_requests"),
            &[
                ("state", "all"),
                ("updated_after", &rfc3339(window.start())),
                ("per_page", &per_page),
            ],
        );
        let truncation = self
            .count_notes(
                mr_list,
                "merge_requests",
                repo,
                usernames,
                window,
                &mut activity,
                |s| &mut s.pr_comments,
            )
            .await?;
        activity.record_truncation(truncation);

        let issue_list = with_query(
            &self.project_url(repo, "/issues"),
            &[
                ("updated_after", &rfc3339(window.start())),
                ("per_page", &per_page),
            ],
        );
        let truncation = self
            .count_notes(
                issue_list,
                "issues",
                repo,
                usernames,
                window,
                &mut activity,
                |s| &mut s.issue_comments,
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
        let lookup = with_query(
            &format!("{}/users", self.identity.base_url),
            &[("username", username)],
        );
        let body = get_json(&self.fetcher, lookup, self.headers()).await?;
        let user_id = body
            .as_array()
            .and_then(|users| users.first())
            .and_then(|user| user.get("id"))
            .and_then(Value::as_u64)
            .ok_or_else(|| FetchError::not_found(format!("user {username}")))?;

        let per_page = PAGE_SIZE.to_string();
        // `after`/`before` are exclusive day bounds; widen one day each way
        // and let the window check decide.
        let after = (window.start().date_naive() - chrono::Duration::days(1)).to_string();
        let before = (window.end().date_naive() + chrono::Duration::days(1)).to_string();
        let events_url = with_query(
            &format!("{}/users/{user_id}/events", self.identity.base_url),
            &[
                ("after", &after),
                ("before", &before),
                ("per_page", &per_page),
            ],
        );

        let mut project_ids = BTreeSet::new();
        let summary = self
            .walker(events_url)
            .visit(|item| {
                let Ok(event) = EventItem::deserialize(item) else {
                    return Walk::Continue;
                };
                if event.created_at.is_some_and(|at| window.contains(at)) {
                    if let Some(id) = event.project_id {
                        project_ids.insert(id);
                    }
                }
                Walk::Continue
            })
            .await?;
        if let Some(truncation) = summary.truncation {
            tracing::warn!(
                forge = %self.identity.name,
                username,
                %truncation,
                "event walk truncated"
            );
        }

        let mut repos = BTreeSet::new();
        for project_id in project_ids {
            let url = format!("{}/projects/{project_id}", self.identity.base_url);
            let body = match get_json(&self.fetcher, url, self.headers()).await {
                Ok(body) => body,
                // The project was deleted or went private since the event.
                Err(FetchError::NotFound { .. }) => continue,
                Err(err) => return Err(err),
            };
            if let Ok(project) = ProjectItem::deserialize(&body) {
                repos.insert(RepoRef::parse(
                    &self.identity.name,
                    &project.path_with_namespace,
                ));
            }
        }
        Ok(repos)
    }
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

    const BASE: &str = "https://gitlab.test/api/v4";
    const PROJECT: &str = "acme%2Fwidget";
    const SINCE: &str = "2025-01-01T00%3A00%3A00Z";
    const UNTIL: &str = "2026-01-01T00%3A00%3A00Z";

    fn window() -> TimeWindow {
        TimeWindow::calendar_year(2025).expect("valid year")
    }

    fn client(mock: &MockTransport) -> GitlabClient {
        GitlabClient::new(
            ForgeIdentity::new(
                "gitlab",
                ForgeKind::GitLab,
                Some(BASE.to_string()),
                Some("glpat-secret".to_string()),
            ),
            Fetcher::new(
                Arc::new(mock.clone()),
                ForgeLimiter::new(1000),
                RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 0),
                "gitlab",
            ),
        )
    }

    fn repo() -> RepoRef {
        RepoRef::new("gitlab", "acme", "widget")
    }

    fn issues_url(user: &str, page: u32) -> String {
        format!(
            "{BASE}/projects/{PROJECT}/issues?author_username={user}&updated_after={SINCE}&per_page=100&page={page}"
        )
    }

    fn mrs_url(user: &str) -> String {
        format!(
            "{BASE}/projects/{PROJECT}/merge_requests?author_username={user}&state=all&updated_after={SINCE}&per_page=100&page=1"
        )
    }

    fn commits_url(user: &str) -> String {
        format!(
            "{BASE}/projects/{PROJECT}/repository/commits?author={user}&since={SINCE}&until={UNTIL}&per_page=100&page=1"
        )
    }

    fn mr_list_url() -> String {
        format!(
            "{BASE}/projects/{PROJECT}/merge_requests?state=all&updated_after={SINCE}&per_page=100&page=1"
        )
    }

    fn issue_list_url() -> String {
        format!("{BASE}/projects/{PROJECT}/issues?updated_after={SINCE}&per_page=100&page=1")
    }

    fn notes_url(kind: &str, iid: u64) -> String {
        format!("{BASE}/projects/{PROJECT}/{kind}/{iid}/notes?per_page=100&page=1")
    }

    #[tokio::test]
    async fn repo_stats_buckets_every_counter() {
        let mock = MockTransport::new();
        mock.push_json(
            issues_url("alice", 1),
            r#"[
                {"created_at": "2025-03-01T12:00:00Z", "closed_at": null},
                {"created_at": "2024-10-01T12:00:00Z", "closed_at": "2025-04-01T12:00:00Z"}
            ]"#,
        );
        mock.push_json(
            mrs_url("alice"),
            r#"[{"created_at": "2025-02-01T00:00:00Z", "closed_at": null, "merged_at": "2025-02-03T00:00:00Z"}]"#,
        );
        mock.push_json(
            commits_url("alice"),
            r#"[
                {"committed_date": "2025-05-01T00:00:00Z", "parent_ids": ["a"]},
                {"committed_date": "2025-05-02T00:00:00Z", "parent_ids": ["a", "b"]}
            ]"#,
        );
        mock.push_json(mr_list_url(), r#"[{"iid": 7}]"#);
        mock.push_json(
            notes_url("merge_requests", 7),
            r#"[
                {"author": {"username": "alice"}, "system": true, "created_at": "2025-02-02T00:00:00Z"},
                {"author": {"username": "alice"}, "system": false, "created_at": "2025-02-02T01:00:00Z"},
                {"author": {"username": "alice"}, "created_at": "2024-06-01T00:00:00Z"},
                {"author": {"username": "mallory"}, "created_at": "2025-02-02T02:00:00Z"}
            ]"#,
        );
        mock.push_json(issue_list_url(), r#"[{"iid": 3}]"#);
        mock.push_json(
            notes_url("issues", 3),
            r#"[{"author": {"username": "alice"}, "created_at": "2025-06-01T00:00:00Z"}]"#,
        );

        let client = client(&mock);
        let activity = client
            .repo_stats(&repo(), &["alice".to_string()], window())
            .await
            .expect("stats should succeed");

        let alice = &activity.per_user["alice"];
        assert_eq!(alice.issues_opened, 1);
        assert_eq!(alice.issues_closed, 1);
        assert_eq!(alice.prs_opened, 1);
        assert_eq!(alice.prs_closed, 0);
        assert_eq!(alice.prs_merged, 1);
        assert_eq!(alice.commits, 1);
        assert_eq!(alice.pr_comments, 1);
        assert_eq!(alice.issue_comments, 1);
        assert!(!activity.per_user.contains_key("mallory"));

        let first = &mock.requests()[0];
        assert!(first.url.contains(PROJECT), "path must be percent-encoded");
        assert_eq!(
            header_get(&first.headers, "private-token"),
            Some("glpat-secret")
        );
    }

    #[tokio::test]
    async fn issue_walk_spans_pages_using_the_total_hint() {
        let mock = MockTransport::new();
        let full: Vec<Value> = (0..PAGE_SIZE)
            .map(|_| serde_json::json!({"created_at": "2025-03-01T12:00:00Z", "closed_at": null}))
            .collect();
        mock.push_response(
            issues_url("alice", 1),
            HttpResponse {
                status: 200,
                headers: vec![("X-Total-Pages".to_string(), "2".to_string())],
                body: serde_json::to_string(&full).expect("serialize").into_bytes(),
            },
        );
        mock.push_json(
            issues_url("alice", 2),
            r#"[{"created_at": "2025-03-02T12:00:00Z", "closed_at": null}]"#,
        );
        mock.push_json(mrs_url("alice"), "[]");
        mock.push_json(commits_url("alice"), "[]");
        mock.push_json(mr_list_url(), "[]");
        mock.push_json(issue_list_url(), "[]");

        let client = client(&mock);
        let activity = client
            .repo_stats(&repo(), &["alice".to_string()], window())
            .await
            .expect("stats should succeed");
        assert_eq!(activity.per_user["alice"].issues_opened, 101);
    }

    #[tokio::test]
    async fn discovery_resolves_event_projects_and_skips_gone_ones() {
        let mock = MockTransport::new();
        mock.push_json(&format!("{BASE}/users?username=alice"), r#"[{"id": 42}]"#);
        mock.push_json(
            &format!(
                "{BASE}/users/42/events?after=2024-12-31&before=2026-01-02&per_page=100&page=1"
            ),
            r#"[
                {"project_id": 1, "created_at": "2025-03-01T00:00:00Z"},
                {"project_id": 1, "created_at": "2025-03-02T00:00:00Z"},
                {"project_id": 2, "created_at": "2024-12-31T10:00:00Z"},
                {"project_id": 9, "created_at": "2025-03-03T00:00:00Z"}
            ]"#,
        );
        mock.push_json(
            &format!("{BASE}/projects/1"),
            r#"{"path_with_namespace": "group/thing"}"#,
        );
        mock.push_status(&format!("{BASE}/projects/9"), 404);

        let client = client(&mock);
        let repos = client
            .discover_repos("alice", window())
            .await
            .expect("discovery should succeed");

        let paths: Vec<String> = repos.iter().map(|r| r.path()).collect();
        assert_eq!(paths, vec!["group/thing"]);
        // Project 2's event predates the window, so it is never resolved.
        assert!(
            mock.requests()
                .iter()
                .all(|r| r.url != format!("{BASE}/projects/2"))
        );
    }

    #[tokio::test]
    async fn discovery_reports_an_unknown_user() {
        let mock = MockTransport::new();
        mock.push_json(&format!("{BASE}/users?username=ghost"), "[]");

        let client = client(&mock);
        let err = client
            .discover_repos("ghost", window())
            .await
            .expect_err("unknown user must fail");
        assert_eq!(
            err,
            FetchError::NotFound {
                resource: "user ghost".to_string()
            }
        );
    }
}
