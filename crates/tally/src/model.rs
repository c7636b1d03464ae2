use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Which forge implementation serves a configured instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ForgeKind {
    GitHub,
    GitLab,
    Pagure,
}

impl ForgeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ForgeKind::GitHub => "github",
            ForgeKind::GitLab => "gitlab",
            ForgeKind::Pagure => "pagure",
        }
    }

    /// Public instance API root used when a configuration omits `base_url`.
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            ForgeKind::GitHub => "https://api.github.com",
            ForgeKind::GitLab => "https://gitlab.com/api/v4",
            ForgeKind::Pagure => "https://pagure.io/api/0",
        }
    }
}

impl fmt::Display for ForgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured forge instance.
///
/// Immutable after construction. Two instances of the same kind may be
/// configured under different names (e.g. gitlab.com and a self-hosted
/// GitLab).
#[derive(Clone)]
pub struct ForgeIdentity {
    pub name: String,
    pub kind: ForgeKind,
    pub base_url: String,
    pub token: Option<String>,
}

impl ForgeIdentity {
    pub fn new(
        name: impl Into<String>,
        kind: ForgeKind,
        base_url: Option<String>,
        token: Option<String>,
    ) -> Self {
        let base_url = base_url.unwrap_or_else(|| kind.default_base_url().to_string());
        Self {
            name: name.into(),
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }
}

// Hand-written so the token can never leak through Debug formatting.
impl fmt::Debug for ForgeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForgeIdentity")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Unique identifier of a repository within a forge.
///
/// Equality is case-sensitive on all three fields. `owner` may be empty for
/// namespace-less Pagure projects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoRef {
    pub forge: String,
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(
        forge: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            forge: forge.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Split an `owner/name` path; a path without `/` has an empty owner.
    pub fn parse(forge: impl Into<String>, path: &str) -> Self {
        match path.rsplit_once('/') {
            Some((owner, name)) => Self::new(forge, owner, name),
            None => Self::new(forge, "", path),
        }
    }

    /// The `owner/name` path (just `name` when the owner is empty).
    #[must_use]
    pub fn path(&self) -> String {
        if self.owner.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.owner, self.name)
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Half-open UTC range `[start, end)` bounding all counted activity.
///
/// An item timestamped exactly at `end` is outside the window; exactly at
/// `start` is inside. Validation (start before end) belongs to the
/// configuration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `[Jan 1 year, Jan 1 year+1)`. None outside chrono's representable
    /// range.
    pub fn calendar_year(year: i32) -> Option<Self> {
        let start = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
        let end = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()?;
        Some(Self { start, end })
    }

    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Same half-open rule for forges that serialize instants as epoch
    /// seconds.
    #[must_use]
    pub fn contains_epoch(&self, seconds: f64) -> bool {
        self.start.timestamp() as f64 <= seconds && seconds < self.end.timestamp() as f64
    }
}

/// RFC 3339 with a trailing `Z`, the form all three forge APIs accept.
pub(crate) fn rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Activity counters for one (repository, username) pair.
///
/// Incremented only by the owning forge client during a single pass; merged
/// additively everywhere else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepoStats {
    pub issues_opened: u64,
    pub issues_closed: u64,
    pub prs_opened: u64,
    pub prs_closed: u64,
    pub prs_merged: u64,
    pub commits: u64,
    pub pr_comments: u64,
    pub issue_comments: u64,
}

impl RepoStats {
    /// Field-wise sum. Commutative and associative, so merge order never
    /// affects totals.
    pub fn merge(&mut self, other: &RepoStats) {
        self.issues_opened += other.issues_opened;
        self.issues_closed += other.issues_closed;
        self.prs_opened += other.prs_opened;
        self.prs_closed += other.prs_closed;
        self.prs_merged += other.prs_merged;
        self.commits += other.commits;
        self.pr_comments += other.pr_comments;
        self.issue_comments += other.issue_comments;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.issues_opened
            + self.issues_closed
            + self.prs_opened
            + self.prs_closed
            + self.prs_merged
            + self.commits
            + self.pr_comments
            + self.issue_comments
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

/// Per-repository result of one fetch unit.
///
/// Every tracked username gets a row even with zero activity, so "no
/// activity" and "not fetched" stay distinguishable downstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoActivity {
    pub per_user: BTreeMap<String, RepoStats>,
    /// Set when a pagination walk hit its safety bound and the counts are
    /// partial.
    pub truncation: Option<FetchError>,
}

impl RepoActivity {
    pub fn for_users<'a>(usernames: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            per_user: usernames
                .into_iter()
                .map(|u| (u.to_string(), RepoStats::default()))
                .collect(),
            truncation: None,
        }
    }

    pub fn user_mut(&mut self, username: &str) -> &mut RepoStats {
        self.per_user.entry(username.to_string()).or_default()
    }

    /// Keep the first truncation seen; later ones describe the same partial
    /// unit.
    pub fn record_truncation(&mut self, truncation: Option<FetchError>) {
        if self.truncation.is_none() {
            self.truncation = truncation;
        }
    }
}

/// Cross-forge aggregation of all successful fetch units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub by_user: BTreeMap<String, RepoStats>,
    pub by_repo: BTreeMap<RepoRef, RepoStats>,
    pub total: RepoStats,
}

impl AggregateReport {
    /// Pre-seed all-zero rows so configured users and repos are present even
    /// when every matching fetch fails or finds nothing.
    pub fn seed<'a>(
        usernames: impl IntoIterator<Item = &'a str>,
        repos: impl IntoIterator<Item = &'a RepoRef>,
    ) -> Self {
        let mut report = Self::default();
        for username in usernames {
            report.by_user.entry(username.to_string()).or_default();
        }
        for repo in repos {
            report.by_repo.entry(repo.clone()).or_default();
        }
        report
    }

    /// Merge one unit's counters into the per-user, per-repo, and grand
    /// totals.
    pub fn absorb(&mut self, repo: &RepoRef, activity: &RepoActivity) {
        for (username, stats) in &activity.per_user {
            self.by_user.entry(username.clone()).or_default().merge(stats);
            self.by_repo.entry(repo.clone()).or_default().merge(stats);
            self.total.merge(stats);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_2025() -> TimeWindow {
        TimeWindow::calendar_year(2025).expect("valid year")
    }

    #[test]
    fn window_is_half_open() {
        let window = window_2025();
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(window.contains(start), "start instant is included");
        assert!(!window.contains(end), "end instant is excluded");
        assert!(window.contains(end - chrono::Duration::seconds(1)));
        assert!(!window.contains(start - chrono::Duration::seconds(1)));
    }

    #[test]
    fn epoch_comparison_follows_the_same_rule() {
        let window = window_2025();
        let start = window.start().timestamp() as f64;
        let end = window.end().timestamp() as f64;
        assert!(window.contains_epoch(start));
        assert!(!window.contains_epoch(end));
        assert!(window.contains_epoch(end - 1.0));
        assert!(!window.contains_epoch(start - 0.5));
    }

    #[test]
    fn calendar_year_spans_jan_to_jan() {
        let window = window_2025();
        assert_eq!(rfc3339(window.start()), "2025-01-01T00:00:00Z");
        assert_eq!(rfc3339(window.end()), "2026-01-01T00:00:00Z");
    }

    #[test]
    fn repo_ref_parse_handles_missing_namespace() {
        let with_owner = RepoRef::parse("pagure", "rpms/bash");
        assert_eq!(with_owner.owner, "rpms");
        assert_eq!(with_owner.name, "bash");
        assert_eq!(with_owner.path(), "rpms/bash");

        let bare = RepoRef::parse("pagure", "fedora-websites");
        assert_eq!(bare.owner, "");
        assert_eq!(bare.name, "fedora-websites");
        assert_eq!(bare.path(), "fedora-websites");
        assert_eq!(bare.to_string(), "fedora-websites");
    }

    #[test]
    fn repo_ref_equality_is_case_sensitive() {
        let lower = RepoRef::new("github", "acme", "widget");
        let upper = RepoRef::new("github", "Acme", "widget");
        assert_ne!(lower, upper);
        assert_eq!(lower, RepoRef::parse("github", "acme/widget"));
    }

    #[test]
    fn forge_identity_defaults_and_trims_base_url() {
        let default = ForgeIdentity::new("github", ForgeKind::GitHub, None, None);
        assert_eq!(default.base_url, "https://api.github.com");

        let custom = ForgeIdentity::new(
            "work",
            ForgeKind::GitLab,
            Some("https://git.example.com/api/v4/".to_string()),
            None,
        );
        assert_eq!(custom.base_url, "https://git.example.com/api/v4");
    }

    #[test]
    fn forge_identity_debug_never_shows_the_token() {
        let identity = ForgeIdentity::new(
            "github",
            ForgeKind::GitHub,
            None,
            Some("ghp_supersecret".to_string()),
        );
        let debug = format!("{identity:?}");
        assert!(!debug.contains("supersecret"), "token leaked: {debug}");
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn forge_kind_display_matches_config_spelling() {
        assert_eq!(ForgeKind::GitHub.to_string(), "github");
        assert_eq!(ForgeKind::GitLab.to_string(), "gitlab");
        assert_eq!(ForgeKind::Pagure.to_string(), "pagure");
        let parsed: ForgeKind = serde_json::from_str("\"pagure\"").unwrap();
        assert_eq!(parsed, ForgeKind::Pagure);
    }

    #[test]
    fn stats_merge_totals_every_field() {
        let mut left = RepoStats {
            issues_opened: 1,
            commits: 2,
            ..Default::default()
        };
        let right = RepoStats {
            issues_closed: 3,
            prs_opened: 1,
            prs_closed: 1,
            prs_merged: 1,
            pr_comments: 4,
            issue_comments: 5,
            ..Default::default()
        };
        left.merge(&right);
        assert_eq!(left.total(), 18);
        assert_eq!(left.issues_opened, 1);
        assert_eq!(left.issue_comments, 5);
        assert!(!left.is_zero());
        assert!(RepoStats::default().is_zero());
    }

    #[test]
    fn absorb_is_permutation_invariant() {
        let repo_a = RepoRef::new("github", "acme", "widget");
        let repo_b = RepoRef::new("gitlab", "acme", "gadget");

        let mut act_a = RepoActivity::for_users(["alice", "bob"]);
        act_a.user_mut("alice").issues_opened = 3;
        act_a.user_mut("bob").commits = 7;

        let mut act_b = RepoActivity::for_users(["alice", "bob"]);
        act_b.user_mut("alice").prs_merged = 2;
        act_b.user_mut("bob").pr_comments = 1;

        let seed_users = ["alice", "bob"];
        let seed_repos = [repo_a.clone(), repo_b.clone()];

        let mut forward = AggregateReport::seed(seed_users, seed_repos.iter());
        forward.absorb(&repo_a, &act_a);
        forward.absorb(&repo_b, &act_b);

        let mut reverse = AggregateReport::seed(seed_users, seed_repos.iter());
        reverse.absorb(&repo_b, &act_b);
        reverse.absorb(&repo_a, &act_a);

        assert_eq!(forward, reverse);
        assert_eq!(forward.total.total(), 13);
        assert_eq!(forward.by_user["alice"].issues_opened, 3);
        assert_eq!(forward.by_repo[&repo_b].pr_comments, 1);
    }

    #[test]
    fn seeded_rows_survive_with_zero_activity() {
        let repo = RepoRef::new("github", "acme", "widget");
        let report = AggregateReport::seed(["alice"], [&repo]);
        assert_eq!(report.by_user["alice"], RepoStats::default());
        assert_eq!(report.by_repo[&repo], RepoStats::default());
        assert!(report.total.is_zero());
    }

    #[test]
    fn activity_seeds_rows_and_keeps_first_truncation() {
        let mut activity = RepoActivity::for_users(["alice"]);
        assert_eq!(activity.per_user.len(), 1);
        assert!(activity.per_user["alice"].is_zero());

        activity.record_truncation(None);
        assert!(activity.truncation.is_none());
        activity.record_truncation(Some(FetchError::PaginationExhausted { pages: 3 }));
        activity.record_truncation(Some(FetchError::PaginationExhausted { pages: 9 }));
        assert_eq!(
            activity.truncation,
            Some(FetchError::PaginationExhausted { pages: 3 })
        );
    }
}
