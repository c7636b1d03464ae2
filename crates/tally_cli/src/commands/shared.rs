use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tally::http::HttpTransport;
use tally::run::{ForgeHandle, ProgressCallback};
use tally::{ReqwestTransport, RetryPolicy, build_client};

use crate::config::{Config, ForgeEntry};

/// Outer bound on any single HTTP request.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Select the configured forges matching `filters`, all of them when no
/// filter is given. Unknown names are an error rather than a silent no-op.
pub(crate) fn select_forges<'a>(
    config: &'a Config,
    filters: &[String],
) -> Result<Vec<&'a ForgeEntry>, Box<dyn std::error::Error>> {
    if filters.is_empty() {
        return Ok(config.forges.iter().collect());
    }

    let mut unknown: Vec<&str> = filters
        .iter()
        .filter(|f| !config.forges.iter().any(|e| e.identity.name == **f))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        unknown.sort_unstable();
        unknown.dedup();
        return Err(format!("unknown forge name(s): {}", unknown.join(", ")).into());
    }

    Ok(config
        .forges
        .iter()
        .filter(|e| filters.iter().any(|f| *f == e.identity.name))
        .collect())
}

/// Build one API client per selected forge, all sharing one HTTP transport.
pub(crate) fn build_handles(
    entries: &[&ForgeEntry],
    on_progress: Option<Arc<ProgressCallback>>,
) -> Result<BTreeMap<String, ForgeHandle>, Box<dyn std::error::Error>> {
    let transport: Arc<dyn HttpTransport> = Arc::new(
        ReqwestTransport::with_timeout(HTTP_TIMEOUT)
            .map_err(|e| format!("HTTP client construction failed: {e}"))?,
    );

    let mut handles = BTreeMap::new();
    for entry in entries {
        let client = build_client(
            entry.identity.clone(),
            Arc::clone(&transport),
            RetryPolicy::default(),
            on_progress.clone(),
        );
        handles.insert(
            entry.identity.name.clone(),
            ForgeHandle::new(client, entry.usernames.clone()),
        );
    }
    Ok(handles)
}
