//! Live-fetch throttling keyed by (subject, resource)
//!
//! The subject is the requesting wallet (or "anonymous") and the resource is
//! the token. A throttled request is served from the snapshot, never rejected.
use crate::config::RateLimitConfig;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::debug;

pub const ANONYMOUS_SUBJECT: &str = "anonymous";

type FetchKey = (String, String);

pub struct FetchRateLimiter {
    limiter: Option<DefaultKeyedRateLimiter<FetchKey>>,
}

impl FetchRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self::unlimited();
        }
        let per_minute = NonZeroU32::new(config.fetches_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            limiter: Some(RateLimiter::keyed(quota)),
        }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Consume one live fetch for the pair; false when over quota
    pub fn try_acquire(&self, subject: Option<&str>, resource: &str) -> bool {
        let Some(limiter) = &self.limiter else {
            return true;
        };
        let key = (subject.unwrap_or(ANONYMOUS_SUBJECT).to_string(), resource.to_string());
        match limiter.check_key(&key) {
            Ok(()) => true,
            Err(_) => {
                debug!(subject = %key.0, resource = %key.1, "Live fetch throttled");
                false
            }
        }
    }

    /// Forget keys whose quota has fully replenished
    pub fn prune(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.retain_recent();
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.as_ref().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(burst: u32) -> FetchRateLimiter {
        FetchRateLimiter::new(&RateLimitConfig {
            enabled: true,
            fetches_per_minute: 1,
            burst,
        })
    }

    #[test]
    fn test_burst_then_throttle() {
        let limiter = limiter(2);
        assert!(limiter.try_acquire(Some("wallet"), "mint"));
        assert!(limiter.try_acquire(Some("wallet"), "mint"));
        assert!(!limiter.try_acquire(Some("wallet"), "mint"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1);
        assert!(limiter.try_acquire(Some("wallet"), "mint-a"));
        assert!(limiter.try_acquire(Some("wallet"), "mint-b"));
        assert!(limiter.try_acquire(None, "mint-a"));
        assert!(!limiter.try_acquire(Some("wallet"), "mint-a"));
        assert!(!limiter.try_acquire(Some(ANONYMOUS_SUBJECT), "mint-a"));
        assert_eq!(limiter.tracked_keys(), 3);
    }

    #[test]
    fn test_disabled_never_throttles() {
        let limiter = FetchRateLimiter::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        });
        for _ in 0..100 {
            assert!(limiter.try_acquire(None, "mint"));
        }
    }
}
