use std::path::PathBuf;
use std::sync::Arc;

use chrono::Datelike;
use console::Term;
use tally::run::aggregate;

use crate::commands::shared::{build_handles, select_forges};
use crate::config::{self, Config};
use crate::progress::ProgressReporter;
use crate::render::render_report;

pub(crate) async fn handle_report(
    config: &Config,
    forges: &[String],
    year: Option<i32>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = select_forges(config, forges)?;

    let window = match year {
        Some(year) => config::year_window(year)?,
        None => config.window,
    };

    let repos: Vec<_> = entries
        .iter()
        .flat_map(|e| e.repos.iter().cloned())
        .collect();
    if repos.is_empty() {
        return Err("no repositories configured; run `tally discover` to find some".into());
    }

    let reporter = Arc::new(ProgressReporter::new("Fetching"));
    let callback = reporter.as_callback();
    let handles = build_handles(&entries, Some(Arc::clone(&callback)))?;

    let (report, failures) = aggregate(
        &handles,
        &repos,
        window,
        &config.options,
        Some(callback.as_ref()),
    )
    .await;
    reporter.finish();

    let document = render_report(window, &report, &failures);
    let path = output
        .or_else(|| config.output.clone().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(format!("report-{}.md", window.start().year())));
    std::fs::write(&path, &document)
        .map_err(|e| format!("writing {} failed: {e}", path.display()))?;

    let is_tty = Term::stdout().is_term();
    if is_tty {
        println!("Report written to {}", path.display());
    } else {
        tracing::info!(path = %path.display(), "Report written");
    }

    if !failures.is_empty() {
        if is_tty {
            println!();
            println!("{} unit(s) failed or returned partial counts:", failures.len());
            for failure in &failures {
                println!("  - {failure}");
            }
        } else {
            for failure in &failures {
                tracing::warn!(%failure, "Fetch unit failed");
            }
        }
    }

    Ok(())
}
