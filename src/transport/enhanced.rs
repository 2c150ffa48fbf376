//! Enhanced Transport: composes rate limiting and retries
//! around the Base Transport. Grounded on the teacher's `LlmCall` payload,
//! which layers retry around a plain backend call the same way.

use crate::error::{self, NormalizeOpts, RawError, Result};
use crate::rate_limiter::{RateLimitContext, RateLimiter};
use crate::request::{HttpRequest, HttpResponse, StreamResponse};
use crate::retry::{self, RetryConfig, RetryContext, RetryStats};
use crate::runtime::RuntimeAdapter;
use crate::transport::base::BaseTransport;
use base64::Engine;
use std::sync::Arc;
use url::Url;

/// Canonical provider name lookup by hostname suffix.
const PROVIDER_SUFFIXES: &[(&str, &str)] = &[
    ("openai.com", "openai"),
    ("anthropic.com", "anthropic"),
    ("googleapis.com", "google"),
    ("x.ai", "xai"),
];

/// Derive the canonical provider name, the model (if present in a JSON
/// body), and a key hash from an outgoing request.
pub fn extract_rate_limit_context(request: &HttpRequest) -> RateLimitContext {
    let provider = provider_from_url(&request.url);
    let model = request
        .body
        .as_ref()
        .and_then(|b| b.as_json())
        .and_then(|v| v.get("model").and_then(|m| m.as_str()).map(str::to_string));
    let key_hash = key_hash_from_headers(&request.headers);

    RateLimitContext {
        provider,
        model,
        key_hash: Some(key_hash),
        endpoint: None,
    }
}

fn provider_from_url(raw_url: &str) -> String {
    let Ok(parsed) = Url::parse(raw_url) else {
        return "unknown".to_string();
    };
    let Some(host) = parsed.host_str() else {
        return "unknown".to_string();
    };

    for (suffix, name) in PROVIDER_SUFFIXES {
        if host == *suffix || host.ends_with(&format!(".{suffix}")) {
            return name.to_string();
        }
    }

    // Fallback: second-level domain (e.g. "foo.example.com" -> "example").
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 2 {
        labels[labels.len() - 2].to_string()
    } else {
        host.to_string()
    }
}

fn key_hash_from_headers(headers: &crate::request::Headers) -> String {
    let Some(raw) = headers.get("authorization") else {
        return "anonymous".to_string();
    };
    let token = raw.split_once(' ').map(|(_, rest)| rest).unwrap_or(raw);
    let encoded = base64::engine::general_purpose::STANDARD.encode(token.as_bytes());
    let lower = encoded.to_ascii_lowercase();
    lower.chars().take(8).collect()
}

/// Composes a [`RateLimiter`], a [`RetryConfig`] + [`RetryStats`], and a
/// [`BaseTransport`]. Safe to create and drop freely; independent instances
/// share no state.
pub struct EnhancedTransport<A: RuntimeAdapter> {
    base: BaseTransport<A>,
    adapter: Arc<A>,
    rate_limiter: RateLimiter,
    retry_config: RetryConfig,
    retry_stats: RetryStats,
}

impl<A: RuntimeAdapter> EnhancedTransport<A> {
    pub fn new(
        base: BaseTransport<A>,
        adapter: Arc<A>,
        rate_limiter: RateLimiter,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            base,
            adapter,
            rate_limiter,
            retry_config,
            retry_stats: RetryStats::new(),
        }
    }

    pub fn retry_stats(&self) -> crate::retry::RetryStatsSnapshot {
        self.retry_stats.snapshot()
    }

    /// Wait up to 1 s via the Runtime Adapter if the limiter denies, then
    /// proceed regardless: an intentional, non-precise simplification.
    async fn check_rate_limits(&self, request: &HttpRequest) -> Result<()> {
        let ctx = extract_rate_limit_context(request);
        if !self.rate_limiter.check_limit(&ctx) {
            self.adapter.sleep(1000, request.cancel.as_ref()).await?;
        }
        Ok(())
    }

    /// Sleep for the decided delay (if any) and report whether another
    /// attempt should be made, updating stats along the way.
    async fn wait_or_give_up(
        &self,
        attempt: u32,
        decision: retry::RetryDecision,
        cancel: Option<&crate::request::CancelHandle>,
    ) -> Result<bool> {
        if !decision.retry {
            if attempt > 0 {
                self.retry_stats.record_failed_retry();
            }
            return Ok(false);
        }
        self.retry_stats.record_delay(decision.delay_ms);
        tracing::warn!(attempt, delay_ms = decision.delay_ms, "retrying after failure");
        self.adapter.sleep(decision.delay_ms, cancel).await?;
        Ok(true)
    }

    /// The Base Transport returns a bad status as a plain response rather
    /// than an error, so the retry decision here is driven by classifying
    /// that response the same way the error normalizer would. Once the
    /// retry budget is exhausted on an unsuccessful response, that
    /// classified error (not the response) is what the caller gets back.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.check_rate_limits(&request).await?;

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                self.retry_stats.record_attempt();
            }
            let response = self.base.fetch(request.clone()).await?;

            if response.is_success() {
                if attempt > 0 {
                    self.retry_stats.record_successful_retry();
                }
                return Ok(response);
            }

            let classified =
                error::normalize(RawError::Response(&response), &NormalizeOpts::default());
            let retry_ctx = RetryContext {
                attempt,
                last_error: &classified,
                last_response: Some(&response),
                cancel: request.cancel.as_ref(),
            };
            let decision = retry::decide(&retry_ctx, &self.retry_config, &|| {
                self.adapter.random_uniform()
            });

            if !self
                .wait_or_give_up(attempt, decision, request.cancel.as_ref())
                .await?
            {
                return Err(classified);
            }
            attempt += 1;
        }
    }

    /// Retries wrap stream *establishment* only; once bytes begin arriving,
    /// errors on the body propagate to the caller unwrapped.
    pub async fn stream(&self, request: HttpRequest) -> Result<StreamResponse> {
        self.check_rate_limits(&request).await?;

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                self.retry_stats.record_attempt();
            }
            match self.base.stream(request.clone()).await {
                Ok(stream) => {
                    if attempt > 0 {
                        self.retry_stats.record_successful_retry();
                    }
                    return Ok(stream);
                }
                Err(err) => {
                    let retry_ctx = RetryContext {
                        attempt,
                        last_error: &err,
                        last_response: None,
                        cancel: request.cancel.as_ref(),
                    };
                    let decision = retry::decide(&retry_ctx, &self.retry_config, &|| {
                        self.adapter.random_uniform()
                    });

                    if !self
                        .wait_or_give_up(attempt, decision, request.cancel.as_ref())
                        .await?
                    {
                        return Err(err);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
