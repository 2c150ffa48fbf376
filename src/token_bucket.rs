//! Classical token bucket with on-demand, timer-free refill.

use crate::error::{CoreError, ErrorKind, Result};
use std::time::{Duration, Instant};

/// Configuration validated once at construction time; invalid values never
/// produce a partially-built bucket.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub max_tokens: f64,
    pub refill_rate: f64,
    pub refill_interval: Duration,
}

impl TokenBucketConfig {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            max_tokens,
            refill_rate,
            refill_interval: Duration::from_millis(100),
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.max_tokens.is_finite() || self.max_tokens <= 0.0 {
            return Err(CoreError::new(
                ErrorKind::Validation,
                "max_tokens must be > 0",
            ));
        }
        if self.refill_rate < 0.0 {
            return Err(CoreError::new(
                ErrorKind::Validation,
                "refill_rate must be >= 0",
            ));
        }
        if self.refill_interval.is_zero() {
            return Err(CoreError::new(
                ErrorKind::Validation,
                "refill_interval must be > 0",
            ));
        }
        Ok(())
    }
}

/// A token bucket. Refill is computed lazily on read rather than driven by a
/// background timer§9's "timer-free rate limiting" note.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tokens: config.max_tokens,
            last_refill: Instant::now(),
            config,
        })
    }

    fn refill(&mut self, now: Instant) {
        if self.config.refill_rate == 0.0 {
            self.last_refill = now;
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let added = self.config.refill_rate * elapsed.as_secs_f64();
        if added > 0.0 {
            self.tokens = (self.tokens + added).min(self.config.max_tokens);
            self.last_refill = now;
        }
    }

    /// Attempt to consume `n` tokens. Returns `false` without side effects
    /// if `n` is negative, exceeds `max_tokens`, or there aren't enough
    /// tokens currently available.
    pub fn consume(&mut self, n: f64) -> bool {
        self.consume_at(n, Instant::now())
    }

    pub(crate) fn consume_at(&mut self, n: f64, now: Instant) -> bool {
        if n < 0.0 || n > self.config.max_tokens {
            return false;
        }
        self.refill(now);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&mut self) -> f64 {
        self.available_tokens_at(Instant::now())
    }

    pub(crate) fn available_tokens_at(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    pub fn reset(&mut self) {
        self.tokens = self.config.max_tokens;
        self.last_refill = Instant::now();
    }

    pub fn max_tokens(&self) -> f64 {
        self.config.max_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_max_tokens_fails_construction() {
        let err = TokenBucket::new(TokenBucketConfig::new(0.0, 1.0));
        assert!(err.is_err());
    }

    #[test]
    fn negative_refill_rate_fails_construction() {
        let err = TokenBucket::new(TokenBucketConfig::new(5.0, -1.0));
        assert!(err.is_err());
    }

    #[test]
    fn consume_within_capacity_succeeds_and_deducts() {
        let mut bucket = TokenBucket::new(TokenBucketConfig::new(5.0, 0.0)).unwrap();
        assert!(bucket.consume(3.0));
        assert_eq!(bucket.available_tokens(), 2.0);
    }

    #[test]
    fn consume_more_than_available_fails_without_side_effects() {
        let mut bucket = TokenBucket::new(TokenBucketConfig::new(5.0, 0.0)).unwrap();
        assert!(!bucket.consume(6.0));
        assert_eq!(bucket.available_tokens(), 5.0);
    }

    #[test]
    fn negative_consume_returns_false_without_side_effects() {
        let mut bucket = TokenBucket::new(TokenBucketConfig::new(5.0, 0.0)).unwrap();
        assert!(!bucket.consume(-1.0));
        assert_eq!(bucket.available_tokens(), 5.0);
    }

    #[test]
    fn zero_refill_rate_never_refills() {
        let mut bucket = TokenBucket::new(TokenBucketConfig::new(5.0, 0.0)).unwrap();
        bucket.consume(5.0);
        let later = Instant::now() + Duration::from_secs(10);
        assert_eq!(bucket.available_tokens_at(later), 0.0);
    }

    #[test]
    fn refill_accrues_continuously_and_clamps_to_max() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(TokenBucketConfig::new(5.0, 2.0)).unwrap();
        bucket.consume(5.0);
        let t1 = start + Duration::from_secs(1);
        assert!((bucket.available_tokens_at(t1) - 2.0).abs() < 1e-3);
        let t10 = start + Duration::from_secs(10);
        assert_eq!(bucket.available_tokens_at(t10), 5.0);
    }

    #[test]
    fn reset_restores_max_tokens() {
        let mut bucket = TokenBucket::new(TokenBucketConfig::new(5.0, 1.0)).unwrap();
        bucket.consume(5.0);
        bucket.reset();
        assert_eq!(bucket.available_tokens(), 5.0);
    }

    #[test]
    fn tokens_never_go_negative_or_exceed_burst_under_any_sequence() {
        let mut bucket = TokenBucket::new(TokenBucketConfig::new(10.0, 3.0)).unwrap();
        let mut now = Instant::now();
        for i in 0..50 {
            let consumed = bucket.consume_at(1.5, now);
            let available = bucket.available_tokens_at(now);
            assert!(available >= 0.0, "iteration {i}: negative tokens");
            assert!(available <= 10.0, "iteration {i}: tokens exceed burst");
            let _ = consumed;
            now += Duration::from_millis(200);
        }
    }
}
