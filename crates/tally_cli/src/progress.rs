//! Progress reporting for aggregation and discovery runs.
//!
//! Two modes:
//! - Interactive mode (TTY): an animated progress bar using indicatif
//! - Logging mode (non-TTY): structured logging using tracing

use std::sync::{Arc, Mutex};

use console::Term;
use indicatif::{ProgressBar, ProgressStyle};
use tally::run::{ProgressCallback, RunProgress};

/// Progress reporter that handles both interactive and logging modes.
pub enum ProgressReporter {
    /// Interactive progress bar for TTY.
    Interactive(InteractiveReporter),
    /// Structured logging for non-TTY (CI, pipes).
    Logging(LoggingReporter),
}

impl ProgressReporter {
    /// Create a new progress reporter, auto-detecting TTY mode.
    ///
    /// `label` prefixes the bar, e.g. "Fetching" or "Discovering".
    pub fn new(label: &'static str) -> Self {
        if Term::stdout().is_term() {
            Self::Interactive(InteractiveReporter::new(label))
        } else {
            Self::Logging(LoggingReporter::new())
        }
    }

    /// Handle a progress event.
    pub fn handle(&self, event: RunProgress) {
        match self {
            Self::Interactive(r) => r.handle(event),
            Self::Logging(r) => r.handle(event),
        }
    }

    /// Convert to a ProgressCallback for the library.
    pub fn as_callback(self: &Arc<Self>) -> Arc<ProgressCallback> {
        let reporter = Arc::clone(self);
        Arc::new(Box::new(move |event| {
            reporter.handle(event);
        }))
    }

    /// Finish the progress bar (interactive mode only).
    pub fn finish(&self) {
        if let Self::Interactive(r) = self {
            r.finish();
        }
    }
}

/// Interactive progress reporter using indicatif.
pub struct InteractiveReporter {
    label: &'static str,
    bar: Mutex<Option<ProgressBar>>,
}

impl InteractiveReporter {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            bar: Mutex::new(None),
        }
    }

    pub fn handle(&self, event: RunProgress) {
        let mut bar = self.bar.lock().unwrap_or_else(|e| e.into_inner());

        match event {
            RunProgress::RunStarted { total } => {
                if total == 0 {
                    return;
                }
                let pb = ProgressBar::new(total as u64);
                pb.set_style(Self::bar_style());
                pb.set_prefix(format!("{:12}", self.label));
                *bar = Some(pb);
            }

            RunProgress::UnitStarted { forge, subject } => {
                if let Some(ref pb) = *bar {
                    pb.set_message(format!("{forge} {subject}"));
                }
            }

            RunProgress::UnitFinished {
                forge,
                subject,
                error,
            } => {
                if let Some(ref pb) = *bar {
                    if let Some(error) = error {
                        pb.println(format!("✗ {forge} {subject}: {error}"));
                    }
                    pb.inc(1);
                }
            }

            RunProgress::RetryWait {
                forge,
                attempt,
                delay_ms,
            } => {
                if let Some(ref pb) = *bar {
                    pb.set_message(format!(
                        "⏳ {} rate limited, retry {} in {:.1}s",
                        forge,
                        attempt,
                        delay_ms as f64 / 1000.0
                    ));
                }
            }

            RunProgress::RunComplete { successful, failed } => {
                if let Some(ref pb) = *bar {
                    let msg = if failed > 0 {
                        format!("✓ {successful} done, {failed} failed")
                    } else {
                        format!("✓ {successful} done")
                    };
                    pb.finish_with_message(msg);
                }
            }

            _ => {}
        }
    }

    pub fn finish(&self) {
        let bar = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ref pb) = *bar
            && !pb.is_finished()
        {
            pb.finish();
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {pos:>3}/{len:3} {msg}")
            .expect("Invalid template")
            .progress_chars("█▓░")
    }
}

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, event: RunProgress) {
        match event {
            RunProgress::RunStarted { total } => {
                tracing::info!(total, "Run started");
            }

            RunProgress::UnitStarted { forge, subject } => {
                tracing::debug!(forge = %forge, subject = %subject, "Unit started");
            }

            RunProgress::UnitFinished {
                forge,
                subject,
                error,
            } => match error {
                Some(error) => {
                    tracing::warn!(forge = %forge, subject = %subject, error = %error, "Unit failed");
                }
                None => {
                    tracing::info!(forge = %forge, subject = %subject, "Unit finished");
                }
            },

            RunProgress::RetryWait {
                forge,
                attempt,
                delay_ms,
            } => {
                tracing::warn!(forge = %forge, attempt, delay_ms, "Rate limited, backing off");
            }

            RunProgress::RunComplete { successful, failed } => {
                tracing::info!(successful, failed, "Run complete");
            }

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
