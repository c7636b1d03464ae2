use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use crate::model::ForgeKind;

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default pacing per forge kind (requests per second).
pub mod default_rps {
    /// GitHub: 5000 requests/hour = ~1.4/sec, 10/sec allows bursts.
    pub const GITHUB: u32 = 10;
    /// GitLab: 2000 requests/minute = ~33/sec, 5/sec for safety.
    pub const GITLAB: u32 = 5;
    /// Pagure: undocumented, conservative default.
    pub const PAGURE: u32 = 5;
}

/// Get the default pacing for a forge kind.
#[must_use]
pub fn default_rps_for(kind: ForgeKind) -> u32 {
    match kind {
        ForgeKind::GitHub => default_rps::GITHUB,
        ForgeKind::GitLab => default_rps::GITLAB,
        ForgeKind::Pagure => default_rps::PAGURE,
    }
}

/// Token-bucket pacer for one forge's outbound requests.
///
/// Clones share the same bucket, so every request path against a forge
/// contends on the same budget. Reactive waits (429 handling) live in the
/// fetcher; this only bounds the steady-state rate.
#[derive(Clone)]
pub struct ForgeLimiter {
    inner: Arc<GovernorRateLimiter>,
    rps: u32,
}

impl ForgeLimiter {
    /// Create a limiter allowing `requests_per_second` (0 is treated as 1).
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_second(rps));

        Self {
            inner: Arc::new(limiter),
            rps: rps.get(),
        }
    }

    /// Create a limiter with the default pacing for `kind`.
    pub fn for_kind(kind: ForgeKind) -> Self {
        Self::new(default_rps_for(kind))
    }

    /// Wait until the bucket allows another request.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }

    #[must_use]
    pub fn requests_per_second(&self) -> u32 {
        self.rps
    }
}
