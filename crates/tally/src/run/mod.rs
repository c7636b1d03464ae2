//! Run orchestration: concurrent aggregation and discovery across forges.
//!
//! # Module Structure
//!
//! - [`types`] - Run types: `RunOptions`, `ForgeHandle`, `FetchOutcome`, constants
//! - [`progress`] - Progress reporting: `RunProgress`, `ProgressCallback`, `emit()`
//! - [`engine`] - The engines: `aggregate()`, `enumerate()`
//!
//! # Example
//!
//! ```ignore
//! use tally::run::{RunOptions, aggregate};
//!
//! let options = RunOptions::default();
//! let (report, failures) = aggregate(&forges, &repos, window, &options, None).await;
//! println!("{} total events, {} failures", report.total.total(), failures.len());
//! ```

pub mod engine;
pub mod progress;
mod types;

// Re-export types
pub use types::{FetchOutcome, ForgeHandle, RunOptions};

// Re-export constants
pub use types::{DEFAULT_CONCURRENCY, DEFAULT_PER_FORGE_CONCURRENCY};

// Re-export progress types
pub use progress::{ProgressCallback, RunProgress, emit};

// Re-export engine functions for convenience
pub use engine::{aggregate, enumerate};
