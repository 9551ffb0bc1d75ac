//! Global rate limiter for mailbox round-trips

use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

/// Used when the configured rate is zero
const DEFAULT_RPS: NonZeroU32 = match NonZeroU32::new(10) {
    Some(rps) => rps,
    None => NonZeroU32::MIN,
};

/// Shared limiter in front of every IMAP command
pub struct GlobalRateLimiter {
    limiter: Arc<
        RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl GlobalRateLimiter {
    /// Create a new rate limiter; zero falls back to the default of 10 per second
    pub fn new(requests_per_second: u32) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(DEFAULT_RPS);
        let limiter = RateLimiter::direct(Quota::per_second(per_second));

        Self {
            limiter: Arc::new(limiter),
        }
    }

    /// Wait until a request is allowed
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
        debug!("Rate limiter: request allowed");
    }
}

impl Clone for GlobalRateLimiter {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
        }
    }
}
