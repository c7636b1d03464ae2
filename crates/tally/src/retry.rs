//! Request execution with pacing, classification, and retry.
//!
//! One [`Fetcher`] per forge: it owns that forge's token bucket, its deferral
//! state when the request budget runs dry, and its backoff schedule for
//! transient failures. A throttled forge never delays another forge's
//! requests.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::error::{FetchError, Result, short_body};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limit::ForgeLimiter;
use crate::run::progress::{ProgressCallback, RunProgress, emit};

/// Configuration for retrying transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 3,
            with_jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// One fresh sequence of backoff delays (base, factor 2, capped).
    pub fn schedule(&self) -> impl Iterator<Item = Duration> {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder.build()
    }
}

/// How one response (or transport failure) should be handled.
enum Classified {
    Ok(HttpResponse),
    Fatal(FetchError),
    Transient(FetchError),
    RateLimited { reset_at: Option<DateTime<Utc>> },
}

fn classify(url: &str, response: HttpResponse) -> Classified {
    match response.status {
        status if (200..300).contains(&status) => Classified::Ok(response),
        401 => Classified::Fatal(FetchError::Auth),
        403 if is_rate_limit_indicated(&response) => Classified::RateLimited {
            reset_at: parse_reset(&response),
        },
        403 => Classified::Fatal(FetchError::Auth),
        404 => Classified::Fatal(FetchError::not_found(strip_query(url))),
        429 => Classified::RateLimited {
            reset_at: parse_reset(&response),
        },
        status if status >= 500 => Classified::Transient(FetchError::network(format!(
            "status {status}: {}",
            short_body(&response.body)
        ))),
        // Remaining 4xx: retrying the same request cannot change the answer.
        status => Classified::Fatal(FetchError::network(format!(
            "unexpected status {status}: {}",
            short_body(&response.body)
        ))),
    }
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Does a 403 carry a rate-limit signal rather than a permissions problem?
fn is_rate_limit_indicated(response: &HttpResponse) -> bool {
    response.header("retry-after").is_some() || remaining_is_zero(response)
}

fn remaining_is_zero(response: &HttpResponse) -> bool {
    ["x-ratelimit-remaining", "ratelimit-remaining"]
        .iter()
        .any(|name| response.header(name).is_some_and(|v| v.trim() == "0"))
}

/// Explicit reset time, from `Retry-After` delta seconds or a reset-epoch
/// header.
fn parse_reset(response: &HttpResponse) -> Option<DateTime<Utc>> {
    if let Some(secs) = response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<i64>().ok())
    {
        return Some(Utc::now() + chrono::Duration::seconds(secs.max(0)));
    }
    for name in ["x-ratelimit-reset", "ratelimit-reset"] {
        if let Some(epoch) = response
            .header(name)
            .and_then(|v| v.trim().parse::<i64>().ok())
        {
            return DateTime::from_timestamp(epoch, 0);
        }
    }
    None
}

/// Executes one forge's requests: paces them, classifies responses, and
/// retries transient failures with exponential backoff.
pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    limiter: ForgeLimiter,
    policy: RetryPolicy,
    forge: String,
    /// Earliest instant the next request may go out, set when a response
    /// reports a drained request budget.
    hold_until: Mutex<Option<Instant>>,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        limiter: ForgeLimiter,
        policy: RetryPolicy,
        forge: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy,
            forge: forge.into(),
            hold_until: Mutex::new(None),
            on_progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, on_progress: Option<Arc<ProgressCallback>>) -> Self {
        self.on_progress = on_progress;
        self
    }

    #[must_use]
    pub fn forge(&self) -> &str {
        &self.forge
    }

    /// Send `request`, retrying transient failures.
    ///
    /// `Auth` and `NotFound` come back immediately. Rate-limit responses wait
    /// for the advertised reset when the forge supplies one, otherwise for
    /// the next backoff step; 5xx and transport errors use the backoff alone.
    /// Exhausting the retry budget yields the last classified error.
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut schedule = self.policy.schedule();
        let mut attempt: u32 = 0;

        loop {
            self.pause_for_hold().await;
            self.limiter.wait().await;

            let classified = match self.transport.send(request.clone()).await {
                Ok(response) => {
                    self.note_budget(&response);
                    classify(&request.url, response)
                }
                Err(err) => Classified::Transient(FetchError::network(err.to_string())),
            };

            let (error, reset_at) = match classified {
                Classified::Ok(response) => return Ok(response),
                Classified::Fatal(error) => return Err(error),
                Classified::Transient(error) => (error, None),
                Classified::RateLimited { reset_at } => {
                    (FetchError::RateLimited { reset_at }, reset_at)
                }
            };

            attempt += 1;
            let Some(step) = schedule.next() else {
                tracing::debug!(
                    forge = %self.forge,
                    attempts = attempt,
                    error = %error,
                    "retry budget exhausted"
                );
                return Err(error);
            };
            let delay = match reset_at {
                Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                None => step,
            };

            emit(
                self.on_progress.as_deref(),
                RunProgress::RetryWait {
                    forge: self.forge.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                },
            );
            tracing::debug!(
                forge = %self.forge,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient failure, waiting to retry"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Sleep out any deferral left by a drained request budget.
    async fn pause_for_hold(&self) {
        let deadline = *self.hold_until.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(at) = deadline {
            let now = Instant::now();
            if at > now {
                tracing::debug!(
                    forge = %self.forge,
                    wait_ms = (at - now).as_millis() as u64,
                    "request budget drained, deferring until reset"
                );
                tokio::time::sleep_until(at).await;
            }
        }
    }

    /// A successful response can still warn that the budget just ran out;
    /// defer the next request until the advertised reset.
    fn note_budget(&self, response: &HttpResponse) {
        if !(200..300).contains(&response.status) || !remaining_is_zero(response) {
            return;
        }
        let Some(reset) = parse_reset(response) else {
            return;
        };
        let Ok(delta) = (reset - Utc::now()).to_std() else {
            return;
        };
        let at = Instant::now() + delta;
        let mut hold = self.hold_until.lock().unwrap_or_else(|e| e.into_inner());
        if hold.is_none_or(|current| at > current) {
            *hold = Some(at);
        }
    }
}
