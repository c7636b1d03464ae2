//! Markdown rendering for the activity report.
//!
//! Plain string building; the document is small and a template engine would
//! outweigh it.

use chrono::{Datelike, Utc};

use tally::{AggregateReport, FetchFailure, RepoStats, TimeWindow};

/// Render the full Markdown document for one aggregation run.
pub fn render_report(
    window: TimeWindow,
    report: &AggregateReport,
    failures: &[FetchFailure],
) -> String {
    let mut lines: Vec<String> = Vec::new();

    // The window is half-open, so the last instant inside it is one second
    // before `end`.
    let last = window.end() - chrono::Duration::seconds(1);
    lines.push(format!("# Git Activity Report - {}", window.start().year()));
    lines.push(String::new());
    lines.push(format!(
        "**Report Period:** {} - {}",
        window.start().format("%B %d, %Y"),
        last.format("%B %d, %Y")
    ));
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());

    lines.push("## Overall Summary".to_string());
    lines.push(String::new());
    metric_table(&mut lines, "Total", &report.total);
    lines.push(String::new());

    lines.push("## Per-User Breakdown".to_string());
    lines.push(String::new());
    for (username, stats) in &report.by_user {
        lines.push(format!("### {username}"));
        lines.push(String::new());
        metric_table(&mut lines, "Count", stats);
        lines.push(String::new());
    }

    lines.push("## Per-Repository Breakdown".to_string());
    lines.push(String::new());
    for (repo, stats) in &report.by_repo {
        lines.push(format!("### {} - {}", repo.forge, repo.path()));
        lines.push(String::new());
        metric_table(&mut lines, "Count", stats);
        if stats.is_zero() {
            lines.push(String::new());
            lines.push("*No activity found for tracked users.*".to_string());
        }
        lines.push(String::new());
    }

    if !failures.is_empty() {
        lines.push("## Fetch Failures".to_string());
        lines.push(String::new());
        lines.push("Counts above may be partial.".to_string());
        lines.push(String::new());
        for failure in failures {
            lines.push(format!("- {failure}"));
        }
        lines.push(String::new());
    }

    lines.push("---".to_string());
    lines.push(String::new());
    lines.push(format!(
        "*Report generated on {}*",
        Utc::now().format("%B %d, %Y at %H:%M UTC")
    ));
    lines.push(String::new());

    lines.join("\n")
}

fn metric_table(lines: &mut Vec<String>, value_heading: &str, stats: &RepoStats) {
    lines.push(format!("| Metric | {value_heading} |"));
    lines.push("|--------|-------|".to_string());
    lines.push(format!("| Issues Opened | {} |", stats.issues_opened));
    lines.push(format!("| Issues Closed | {} |", stats.issues_closed));
    lines.push(format!("| PRs Opened | {} |", stats.prs_opened));
    lines.push(format!("| PRs Closed | {} |", stats.prs_closed));
    lines.push(format!("| PRs Merged | {} |", stats.prs_merged));
    lines.push(format!("| Commits | {} |", stats.commits));
    lines.push(format!("| PR Comments | {} |", stats.pr_comments));
    lines.push(format!("| Issue Comments | {} |", stats.issue_comments));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally::{FetchError, RepoActivity, RepoRef};

    fn sample_report() -> (Vec<RepoRef>, AggregateReport) {
        let repos = vec![
            RepoRef::new("github", "acme", "widget"),
            RepoRef::new("pagure", "rpms", "bash"),
        ];
        let mut report = AggregateReport::seed(["alice", "bob"], &repos);

        let mut activity = RepoActivity::default();
        let alice = activity.user_mut("alice");
        alice.commits = 3;
        alice.prs_merged = 1;
        report.absorb(&repos[0], &activity);

        (repos, report)
    }

    #[test]
    fn sections_appear_in_report_order() {
        let window = TimeWindow::calendar_year(2024).unwrap();
        let (_, report) = sample_report();
        let failures = vec![FetchFailure {
            forge: "pagure".to_string(),
            subject: "rpms/bash".to_string(),
            error: FetchError::network("connection reset"),
        }];

        let doc = render_report(window, &report, &failures);

        let order = [
            "# Git Activity Report - 2024",
            "**Report Period:** January 01, 2024 - December 31, 2024",
            "## Overall Summary",
            "## Per-User Breakdown",
            "### alice",
            "### bob",
            "## Per-Repository Breakdown",
            "### github - acme/widget",
            "### pagure - rpms/bash",
            "## Fetch Failures",
            "*Report generated on",
        ];
        let mut cursor = 0;
        for needle in order {
            let at = doc[cursor..]
                .find(needle)
                .unwrap_or_else(|| panic!("missing or out of order: {needle}"));
            cursor += at + needle.len();
        }
    }

    #[test]
    fn tables_carry_the_counters() {
        let window = TimeWindow::calendar_year(2024).unwrap();
        let (_, report) = sample_report();

        let doc = render_report(window, &report, &[]);

        assert!(doc.contains("| Metric | Total |"));
        let alice = doc.split("### alice").nth(1).unwrap();
        let alice = alice.split("###").next().unwrap();
        assert!(alice.contains("| Commits | 3 |"));
        assert!(alice.contains("| PRs Merged | 1 |"));
        assert!(alice.contains("| Issues Opened | 0 |"));
    }

    #[test]
    fn idle_repo_keeps_its_table_and_gains_a_note() {
        let window = TimeWindow::calendar_year(2024).unwrap();
        let (_, report) = sample_report();

        let doc = render_report(window, &report, &[]);

        // rpms/bash was seeded but never absorbed anything.
        let section = doc.split("### pagure - rpms/bash").nth(1).unwrap();
        let section = section.split("## ").next().unwrap();
        assert!(section.contains("| Metric | Count |"));
        assert!(section.contains("*No activity found for tracked users.*"));

        let busy = doc.split("### github - acme/widget").nth(1).unwrap();
        let busy = busy.split("###").next().unwrap();
        assert!(!busy.contains("*No activity found for tracked users.*"));
    }

    #[test]
    fn failures_section_only_appears_when_failures_exist() {
        let window = TimeWindow::calendar_year(2024).unwrap();
        let (_, report) = sample_report();

        let clean = render_report(window, &report, &[]);
        assert!(!clean.contains("## Fetch Failures"));

        let failures = vec![FetchFailure {
            forge: "github".to_string(),
            subject: "acme/gone".to_string(),
            error: FetchError::not_found("repo acme/gone"),
        }];
        let noisy = render_report(window, &report, &failures);
        assert!(noisy.contains("- github acme/gone: not found: repo acme/gone"));
    }
}
