//! Concurrent run engines for aggregation and discovery.
//!
//! Both engines share one shape: fan fetch units out onto the tokio runtime
//! under a global and a per-forge concurrency bound, then fold the value
//! results back on the caller's task. A unit that fails is itemized in the
//! run's failure list and never takes the rest of the run down with it.
//!
//! Progress is observed through the optional [`ProgressCallback`]; the
//! engines never print.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::progress::{ProgressCallback, RunProgress, emit};
use super::types::{FetchOutcome, ForgeHandle, RunOptions};
use crate::error::{FetchError, FetchFailure};
use crate::model::{AggregateReport, RepoRef, TimeWindow};

/// Units blocked on a permit when the runtime tears the semaphore down.
const SEMAPHORE_CLOSED: &str = "run semaphore closed unexpectedly";

fn forge_semaphores(
    forges: &BTreeMap<String, ForgeHandle>,
    per_forge: usize,
) -> BTreeMap<String, Arc<Semaphore>> {
    forges
        .keys()
        .map(|name| (name.clone(), Arc::new(Semaphore::new(per_forge.max(1)))))
        .collect()
}

/// Fetch per-user stats for every repository and fold them into one report.
///
/// One unit is one (forge, repository) fetch, routed by `RepoRef::forge`.
/// The report is seeded with every configured username and every requested
/// repository up front, so zero activity and "not fetched" stay
/// distinguishable: a failed unit leaves its seeded zero rows in place and
/// adds an entry to the returned failure list.
///
/// A unit whose counts were truncated by the pagination safety bound is
/// still absorbed; the truncation is itemized alongside the hard failures.
/// When `options.timeout` expires, units still in flight are aborted and
/// recorded as [`FetchError::Cancelled`] while finished results are kept.
#[tracing::instrument(skip_all, fields(repos = repos.len(), forges = forges.len()))]
pub async fn aggregate(
    forges: &BTreeMap<String, ForgeHandle>,
    repos: &[RepoRef],
    window: TimeWindow,
    options: &RunOptions,
    on_progress: Option<&ProgressCallback>,
) -> (AggregateReport, Vec<FetchFailure>) {
    let usernames: BTreeSet<&str> = forges
        .values()
        .flat_map(|handle| handle.usernames.iter().map(String::as_str))
        .collect();
    let mut report = AggregateReport::seed(usernames.iter().copied(), repos.iter());
    let mut failures = Vec::new();

    emit(on_progress, RunProgress::RunStarted { total: repos.len() });
    if repos.is_empty() {
        emit(
            on_progress,
            RunProgress::RunComplete {
                successful: 0,
                failed: 0,
            },
        );
        return (report, failures);
    }

    let deadline = options
        .timeout
        .map(|budget| tokio::time::Instant::now() + budget);
    let global = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let per_forge = forge_semaphores(forges, options.per_forge_concurrency);

    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut handles: Vec<(String, String, JoinHandle<FetchOutcome>)> =
        Vec::with_capacity(repos.len());

    for repo in repos {
        let forge = repo.forge.clone();
        let subject = repo.path();
        emit(
            on_progress,
            RunProgress::UnitStarted {
                forge: forge.clone(),
                subject: subject.clone(),
            },
        );

        let Some(handle) = forges.get(&repo.forge) else {
            let failure = FetchFailure {
                forge,
                subject,
                error: FetchError::not_found(format!("forge {} is not configured", repo.forge)),
            };
            failed += 1;
            emit(
                on_progress,
                RunProgress::UnitFinished {
                    forge: failure.forge.clone(),
                    subject: failure.subject.clone(),
                    error: Some(failure.error.to_string()),
                },
            );
            failures.push(failure);
            continue;
        };

        let client = Arc::clone(&handle.client);
        let usernames = handle.usernames.clone();
        let global = Arc::clone(&global);
        let slot = Arc::clone(&per_forge[&repo.forge]);
        let repo = repo.clone();
        let task_forge = forge.clone();
        let task_subject = subject.clone();

        let join = tokio::spawn(async move {
            let _global = match global.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return FetchOutcome::Failed(FetchFailure {
                        forge: task_forge,
                        subject: task_subject,
                        error: FetchError::network(SEMAPHORE_CLOSED),
                    });
                }
            };
            let _slot = match slot.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return FetchOutcome::Failed(FetchFailure {
                        forge: task_forge,
                        subject: task_subject,
                        error: FetchError::network(SEMAPHORE_CLOSED),
                    });
                }
            };
            match client.repo_stats(&repo, &usernames, window).await {
                Ok(activity) => FetchOutcome::Stats { repo, activity },
                Err(error) => FetchOutcome::Failed(FetchFailure {
                    forge: task_forge,
                    subject: task_subject,
                    error,
                }),
            }
        });
        handles.push((forge, subject, join));
    }

    for (forge, subject, mut join) in handles {
        let joined = match deadline {
            Some(at) => match tokio::time::timeout_at(at, &mut join).await {
                Ok(joined) => joined,
                Err(_) => {
                    join.abort();
                    let failure = FetchFailure {
                        forge: forge.clone(),
                        subject: subject.clone(),
                        error: FetchError::Cancelled,
                    };
                    failed += 1;
                    emit(
                        on_progress,
                        RunProgress::UnitFinished {
                            forge,
                            subject,
                            error: Some(failure.error.to_string()),
                        },
                    );
                    failures.push(failure);
                    continue;
                }
            },
            None => join.await,
        };

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_error) => FetchOutcome::Failed(FetchFailure {
                forge: forge.clone(),
                subject: subject.clone(),
                error: FetchError::network(format!("fetch task failed: {join_error}")),
            }),
        };

        match outcome {
            FetchOutcome::Stats { repo, activity } => {
                if let Some(truncation) = &activity.truncation {
                    failures.push(FetchFailure {
                        forge: forge.clone(),
                        subject: subject.clone(),
                        error: truncation.clone(),
                    });
                }
                report.absorb(&repo, &activity);
                successful += 1;
                emit(
                    on_progress,
                    RunProgress::UnitFinished {
                        forge,
                        subject,
                        error: None,
                    },
                );
            }
            FetchOutcome::Failed(failure) => {
                failed += 1;
                emit(
                    on_progress,
                    RunProgress::UnitFinished {
                        forge,
                        subject,
                        error: Some(failure.error.to_string()),
                    },
                );
                failures.push(failure);
            }
        }
    }

    tracing::debug!(successful, failed, "aggregation run complete");
    emit(
        on_progress,
        RunProgress::RunComplete { successful, failed },
    );
    (report, failures)
}

/// Discover the repositories each configured user touched in the window.
///
/// One unit is one (forge, username) discovery. Results are unioned per
/// forge; every configured forge keeps a key in the returned map even when
/// all of its units fail. Deadline handling matches [`aggregate`].
#[tracing::instrument(skip_all, fields(forges = forges.len()))]
pub async fn enumerate(
    forges: &BTreeMap<String, ForgeHandle>,
    window: TimeWindow,
    options: &RunOptions,
    on_progress: Option<&ProgressCallback>,
) -> (BTreeMap<String, BTreeSet<RepoRef>>, Vec<FetchFailure>) {
    let mut discovered: BTreeMap<String, BTreeSet<RepoRef>> = forges
        .keys()
        .map(|name| (name.clone(), BTreeSet::new()))
        .collect();
    let mut failures = Vec::new();

    let units: Vec<(String, String)> = forges
        .iter()
        .flat_map(|(name, handle)| {
            handle
                .usernames
                .iter()
                .map(|username| (name.clone(), username.clone()))
        })
        .collect();

    emit(
        on_progress,
        RunProgress::RunStarted {
            total: units.len(),
        },
    );
    if units.is_empty() {
        emit(
            on_progress,
            RunProgress::RunComplete {
                successful: 0,
                failed: 0,
            },
        );
        return (discovered, failures);
    }

    let deadline = options
        .timeout
        .map(|budget| tokio::time::Instant::now() + budget);
    let global = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let per_forge = forge_semaphores(forges, options.per_forge_concurrency);

    type DiscoveryResult = Result<BTreeSet<RepoRef>, FetchError>;
    let mut handles: Vec<(String, String, JoinHandle<DiscoveryResult>)> =
        Vec::with_capacity(units.len());

    for (forge, username) in units {
        emit(
            on_progress,
            RunProgress::UnitStarted {
                forge: forge.clone(),
                subject: username.clone(),
            },
        );

        let client = Arc::clone(&forges[&forge].client);
        let global = Arc::clone(&global);
        let slot = Arc::clone(&per_forge[&forge]);
        let task_user = username.clone();

        let join = tokio::spawn(async move {
            let _global = global
                .acquire_owned()
                .await
                .map_err(|_| FetchError::network(SEMAPHORE_CLOSED))?;
            let _slot = slot
                .acquire_owned()
                .await
                .map_err(|_| FetchError::network(SEMAPHORE_CLOSED))?;
            client.discover_repos(&task_user, window).await
        });
        handles.push((forge, username, join));
    }

    let mut successful = 0usize;
    let mut failed = 0usize;
    for (forge, username, mut join) in handles {
        let joined = match deadline {
            Some(at) => match tokio::time::timeout_at(at, &mut join).await {
                Ok(joined) => joined,
                Err(_) => {
                    join.abort();
                    failed += 1;
                    emit(
                        on_progress,
                        RunProgress::UnitFinished {
                            forge: forge.clone(),
                            subject: username.clone(),
                            error: Some(FetchError::Cancelled.to_string()),
                        },
                    );
                    failures.push(FetchFailure {
                        forge,
                        subject: username,
                        error: FetchError::Cancelled,
                    });
                    continue;
                }
            },
            None => join.await,
        };

        let result = match joined {
            Ok(result) => result,
            Err(join_error) => Err(FetchError::network(format!(
                "discovery task failed: {join_error}"
            ))),
        };

        match result {
            Ok(repos) => {
                successful += 1;
                if let Some(set) = discovered.get_mut(&forge) {
                    set.extend(repos);
                }
                emit(
                    on_progress,
                    RunProgress::UnitFinished {
                        forge,
                        subject: username,
                        error: None,
                    },
                );
            }
            Err(error) => {
                failed += 1;
                emit(
                    on_progress,
                    RunProgress::UnitFinished {
                        forge: forge.clone(),
                        subject: username.clone(),
                        error: Some(error.to_string()),
                    },
                );
                failures.push(FetchFailure {
                    forge,
                    subject: username,
                    error,
                });
            }
        }
    }

    tracing::debug!(successful, failed, "discovery run complete");
    emit(
        on_progress,
        RunProgress::RunComplete { successful, failed },
    );
    (discovered, failures)
}
