//! Progress events for aggregation and discovery runs.
//!
//! The library never prints; callers observe a run through an optional
//! callback and own all presentation.

/// Progress events emitted during a run.
///
/// Marked non-exhaustive so new events can be added without breaking
/// consumers.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RunProgress {
    /// Dispatching `total` fetch units.
    RunStarted {
        /// Number of units in this run.
        total: usize,
    },

    /// One unit was dispatched.
    UnitStarted {
        /// Configured forge name.
        forge: String,
        /// Repository path (stats) or username (discovery).
        subject: String,
    },

    /// One unit finished, successfully or not.
    UnitFinished {
        /// Configured forge name.
        forge: String,
        /// Repository path (stats) or username (discovery).
        subject: String,
        /// Short error message when the unit failed.
        error: Option<String>,
    },

    /// A request hit a transient failure and is waiting to retry.
    RetryWait {
        /// Configured forge name.
        forge: String,
        /// Retry attempt number, starting at 1.
        attempt: u32,
        /// How long the wait lasts.
        delay_ms: u64,
    },

    /// All units accounted for.
    RunComplete {
        /// Units that produced a result.
        successful: usize,
        /// Units that produced nothing.
        failed: usize,
    },
}

/// Callback type for reporting progress during runs.
pub type ProgressCallback = Box<dyn Fn(RunProgress) + Send + Sync>;

/// Emit a progress event if a callback is configured.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: RunProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}
