//! Stage-wide request throttle.
//!
//! One token bucket shared by every route. It is not per client and not per
//! route; requests beyond the bucket are rejected before any handler runs.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokenbridge_core::{Error, Result};
use tracing::warn;

use crate::error::ApiError;

/// Rate and burst of the stage throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Sustained requests per second.
    pub rate_limit: u64,
    /// Bucket capacity.
    pub burst_limit: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate_limit: 50,
            burst_limit: 100,
        }
    }
}

impl ThrottleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit == 0 || self.burst_limit == 0 {
            return Err(Error::InvalidConfig(
                "throttle rate_limit and burst_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket refilled lazily on each acquire.
#[derive(Debug)]
pub struct StageThrottle {
    config: ThrottleConfig,
    bucket: Mutex<Bucket>,
}

impl StageThrottle {
    pub fn new(config: ThrottleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: config.burst_limit as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Take one token, or return how long until one is available.
    pub fn try_acquire(&self) -> std::result::Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> std::result::Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() * self.config.rate_limit as f64;
        bucket.tokens = (bucket.tokens + refill).min(self.config.burst_limit as f64);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(deficit / self.config.rate_limit as f64))
        }
    }
}

/// Reject the request with 429 when the bucket is empty.
pub async fn throttle(State(throttle): State<Arc<StageThrottle>>, request: Request, next: Next) -> Response {
    match throttle.try_acquire() {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(path = %request.uri().path(), ?retry_after, "Request throttled");
            ApiError::TooManyRequests { retry_after }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(rate_limit: u64, burst_limit: u64) -> StageThrottle {
        StageThrottle::new(ThrottleConfig {
            rate_limit,
            burst_limit,
        })
        .unwrap()
    }

    #[test]
    fn test_default_matches_stage_limits() {
        let config = ThrottleConfig::default();
        assert_eq!(config.rate_limit, 50);
        assert_eq!(config.burst_limit, 100);
    }

    #[test]
    fn test_rejects_zero_limits() {
        assert!(
            StageThrottle::new(ThrottleConfig {
                rate_limit: 0,
                burst_limit: 10
            })
            .is_err()
        );
    }

    #[test]
    fn test_burst_then_reject() {
        let throttle = throttle(50, 100);
        let now = Instant::now();

        for _ in 0..100 {
            assert!(throttle.try_acquire_at(now).is_ok());
        }
        let retry_after = throttle.try_acquire_at(now).unwrap_err();
        assert!(retry_after <= Duration::from_millis(20));
    }

    #[test]
    fn test_refills_at_rate() {
        let throttle = throttle(50, 100);
        let start = Instant::now();
        for _ in 0..100 {
            throttle.try_acquire_at(start).unwrap();
        }

        // 50 rps: one second later exactly 50 more are allowed.
        let later = start + Duration::from_secs(1);
        for _ in 0..50 {
            assert!(throttle.try_acquire_at(later).is_ok());
        }
        assert!(throttle.try_acquire_at(later).is_err());
    }

    #[test]
    fn test_refill_capped_at_burst() {
        let throttle = throttle(50, 10);
        let later = Instant::now() + Duration::from_secs(60);

        let allowed = (0..20).filter(|_| throttle.try_acquire_at(later).is_ok()).count();
        assert_eq!(allowed, 10);
    }
}
