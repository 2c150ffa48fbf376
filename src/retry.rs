//! Retry policy engine: classified status codes, exponential/linear
//! backoff with optional jitter, and running statistics.
//!
//! Grounded on the teacher's `backend::backoff::BackoffConfig`, the same
//! shape of config with capped, jittered delays, generalized from a
//! single AWS-style jitter strategy to a full decision table
//! (status-code classification, cancellation dominance, `Retry-After`
//! override).

use crate::error::{CoreError, ErrorKind};
use crate::request::{CancelHandle, HttpResponse};
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffMode {
    Exponential,
    Linear,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum additional tries beyond the initial attempt. 0 = no retry.
    pub attempts: u32,
    pub backoff: BackoffMode,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub retryable_status_codes: HashSet<u16>,
}

impl RetryConfig {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: BackoffMode::Exponential,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter: true,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
        }
    }

    pub fn none() -> Self {
        Self::new(0)
    }

    /// Delay for 0-based attempt `a`, without jitter or `Retry-After` override.
    fn base_delay_ms(&self, a: u32) -> u64 {
        let delay = match self.backoff {
            BackoffMode::Exponential => {
                let factor = 2u64.checked_pow(a).unwrap_or(u64::MAX);
                self.base_delay_ms.saturating_mul(factor)
            }
            BackoffMode::Linear => self.base_delay_ms.saturating_mul(a as u64 + 1),
        };
        delay.min(self.max_delay_ms)
    }

    /// Apply jitter: uniform random in `[0.5, 1.5)`, then clamp to `[0, max_delay_ms]`.
    fn jittered_delay_ms(&self, a: u32, random_uniform: &dyn Fn() -> f64) -> u64 {
        let base = self.base_delay_ms(a);
        if !self.jitter {
            return base;
        }
        let factor = 0.5 + random_uniform();
        let delayed = (base as f64 * factor).round() as i64;
        delayed.clamp(0, self.max_delay_ms as i64) as u64
    }
}

/// Everything the policy decision (§4.3) needs about the attempt that just failed.
pub struct RetryContext<'a> {
    pub attempt: u32,
    pub last_error: &'a CoreError,
    pub last_response: Option<&'a HttpResponse>,
    pub cancel: Option<&'a CancelHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay_ms: u64,
}

impl RetryDecision {
    fn no_retry() -> Self {
        Self {
            retry: false,
            delay_ms: 0,
        }
    }
}

/// Decide whether to retry and, if so, how long to wait.
pub fn decide(ctx: &RetryContext<'_>, config: &RetryConfig, random_uniform: &dyn Fn() -> f64) -> RetryDecision {
    if ctx.cancel.is_some_and(|c| c.is_cancelled()) {
        return RetryDecision::no_retry();
    }
    if ctx.attempt >= config.attempts {
        return RetryDecision::no_retry();
    }
    if let Some(resp) = ctx.last_response {
        if !config.retryable_status_codes.contains(&resp.status) {
            return RetryDecision::no_retry();
        }
    }

    match ctx.last_error.kind {
        ErrorKind::Validation | ErrorKind::Auth => RetryDecision::no_retry(),
        ErrorKind::Timeout
        | ErrorKind::Transport
        | ErrorKind::RateLimit
        | ErrorKind::Overloaded
        | ErrorKind::Provider => {
            let mut delay_ms = config.jittered_delay_ms(ctx.attempt, random_uniform);
            if let Some(retry_after_secs) = ctx.last_error.context.retry_after {
                delay_ms = (retry_after_secs * 1000).min(config.max_delay_ms);
            }
            RetryDecision {
                retry: true,
                delay_ms,
            }
        }
        ErrorKind::Streaming => RetryDecision::no_retry(),
    }
}

/// Cumulative totals tracked by the Enhanced Transport across its retry loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryStatsSnapshot {
    pub total_attempts: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub mean_delay_ms: f64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Default)]
struct StatsInner {
    total_attempts: u64,
    successful_retries: u64,
    failed_retries: u64,
    mean_delay_ms: f64,
    delay_samples: u64,
    max_delay_ms: u64,
}

/// Thread-safe, additive-only retry statistics.
#[derive(Debug, Default)]
pub struct RetryStats(Mutex<StatsInner>);

impl RetryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.0.lock().unwrap().total_attempts += 1;
    }

    pub fn record_successful_retry(&self) {
        self.0.lock().unwrap().successful_retries += 1;
    }

    pub fn record_failed_retry(&self) {
        self.0.lock().unwrap().failed_retries += 1;
    }

    pub fn record_delay(&self, delay_ms: u64) {
        let mut inner = self.0.lock().unwrap();
        inner.delay_samples += 1;
        let n = inner.delay_samples as f64;
        inner.mean_delay_ms += (delay_ms as f64 - inner.mean_delay_ms) / n;
        inner.max_delay_ms = inner.max_delay_ms.max(delay_ms);
    }

    pub fn snapshot(&self) -> RetryStatsSnapshot {
        let inner = self.0.lock().unwrap();
        RetryStatsSnapshot {
            total_attempts: inner.total_attempts,
            successful_retries: inner.successful_retries,
            failed_retries: inner.failed_retries,
            mean_delay_ms: inner.mean_delay_ms,
            max_delay_ms: inner.max_delay_ms,
        }
    }
}
