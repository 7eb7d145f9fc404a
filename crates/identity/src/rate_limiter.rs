//! Sliding-window rate limiting keyed by IP/client, with a progressive
//! backoff variant.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use shared::error::CommonError;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub window: Duration,
    pub max_requests: u32,
    /// When `true`, repeated violations within the window extend the
    /// effective wait time exponentially instead of just rejecting at a
    /// flat rate (used for registration/login endpoints).
    pub progressive_backoff: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            max_requests: 10,
            progressive_backoff: false,
        }
    }
}

struct Bucket {
    hits: VecDeque<Instant>,
    violations: u32,
    backoff_until: Option<Instant>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            hits: VecDeque::new(),
            violations: 0,
            backoff_until: None,
        }
    }
}

/// Per-key sliding-window counters. One instance covers one rate-limited
/// surface (e.g. "client registrations by source IP"); distinct surfaces
/// get distinct `RateLimiter`s so their windows and config don't collide.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: DashMap<String, Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Checks and records a hit for `key`. Returns `rate_limit_exceeded`
    /// (mapped to HTTP 429 by `CommonError::IntoResponse`) when the window
    /// is full, or when still inside a progressive backoff window.
    pub fn check(&self, key: &str) -> Result<(), CommonError> {
        let now = Instant::now();
        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| Mutex::new(Bucket::new()));
        let mut bucket = entry.lock();

        if let Some(until) = bucket.backoff_until {
            if now < until {
                let retry_after_ms = (until - now).as_millis() as u64;
                return Err(CommonError::RateLimitExceeded {
                    msg: "rate limit exceeded, backing off".to_string(),
                    retry_after_ms: Some(retry_after_ms),
                });
            }
            bucket.backoff_until = None;
        }

        while let Some(front) = bucket.hits.front() {
            if now.duration_since(*front) > self.config.window {
                bucket.hits.pop_front();
            } else {
                break;
            }
        }

        if bucket.hits.len() as u32 >= self.config.max_requests {
            bucket.violations += 1;
            if self.config.progressive_backoff {
                let backoff_secs = 2u64.saturating_pow(bucket.violations.min(10));
                bucket.backoff_until = Some(now + Duration::from_secs(backoff_secs));
            }
            let retry_after_ms = bucket
                .hits
                .front()
                .map(|oldest| self.config.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.config.window)
                .as_millis() as u64;
            return Err(CommonError::RateLimitExceeded {
                msg: "rate limit exceeded".to_string(),
                retry_after_ms: Some(retry_after_ms),
            });
        }

        bucket.hits.push_back(now);
        Ok(())
    }

    /// Removes buckets that have been idle for longer than twice the
    /// window; meant to be driven by a periodic janitor task.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let stale_window = self.config.window * 2;
        self.buckets.retain(|_, bucket| {
            let bucket = bucket.lock();
            match bucket.hits.back() {
                Some(last) => now.duration_since(*last) < stale_window,
                None => false,
            }
        });
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_requests_then_rejects() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            window: Duration::from_secs(3600),
            max_requests: 10,
            progressive_backoff: false,
        });

        for _ in 0..10 {
            limiter.check("1.2.3.4").unwrap();
        }
        assert!(limiter.check("1.2.3.4").is_err());
    }

    #[test]
    fn distinct_keys_have_independent_windows() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            window: Duration::from_secs(3600),
            max_requests: 1,
            progressive_backoff: false,
        });

        limiter.check("a").unwrap();
        limiter.check("b").unwrap();
        assert!(limiter.check("a").is_err());
        assert!(limiter.check("b").is_err());
    }

    #[test]
    fn progressive_backoff_extends_wait_on_repeat_violation() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            window: Duration::from_secs(60),
            max_requests: 1,
            progressive_backoff: true,
        });

        limiter.check("x").unwrap();
        let first = limiter.check("x").unwrap_err();
        let second = limiter.check("x").unwrap_err();

        let extract = |e: CommonError| match e {
            CommonError::RateLimitExceeded { retry_after_ms, .. } => retry_after_ms.unwrap(),
            _ => panic!("expected RateLimitExceeded"),
        };
        assert!(extract(second) >= extract(first));
    }

    #[test]
    fn sweep_removes_stale_buckets() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            window: Duration::from_millis(1),
            max_requests: 5,
            progressive_backoff: false,
        });
        limiter.check("stale").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        limiter.sweep_expired();
        assert_eq!(limiter.bucket_count(), 0);
    }
}
