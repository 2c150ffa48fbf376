//! # llm-transport-core
//!
//! A reliability-layered HTTP transport core for LLM provider bridges:
//! scoped token-bucket rate limiting, a classified retry policy, a
//! priority-ordered interceptor chain, and an SSE streaming delta parser
//! that lifts provider events into a uniform shape. A closed, eight-variant
//! error taxonomy with secret redaction is threaded through every layer.
//!
//! The core depends on its environment only through a [`runtime::RuntimeAdapter`]
//! time, randomness, and I/O are all obtained through it, which keeps the
//! core portable and lets tests swap in a scripted fake.
//!
//! ## Layering
//!
//! - [`token_bucket`] / [`rate_limiter`]: scoped, LRU-evicted rate limiting.
//! - [`retry`]: classified backoff decisions and running statistics.
//! - [`error`]: the eight-kind taxonomy, classification, and sanitization.
//! - [`sse`] / [`delta`]: SSE framing and provider-agnostic delta lifting.
//! - [`interceptor`]: priority-ordered request/response hooks.
//! - [`translator`]: the seam to provider-specific request/response shaping.
//! - [`runtime`]: the capability surface (time, randomness, HTTP, streaming).
//! - [`transport`]: a base transport (interceptors + adapter) composed
//!   with rate limiting and retries in an enhanced transport.
//!
//! ## Quick start
//!
//! ```no_run
//! use llm_transport_core::rate_limiter::{RateLimitConfig, RateLimiter, Scope};
//! use llm_transport_core::retry::RetryConfig;
//! use llm_transport_core::interceptor::InterceptorChain;
//! use llm_transport_core::runtime::TokioRuntimeAdapter;
//! use llm_transport_core::transport::{BaseTransport, EnhancedTransport};
//! use llm_transport_core::request::{HttpRequest, Method};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = Arc::new(TokioRuntimeAdapter::new());
//!     let base = BaseTransport::new(adapter.clone(), Arc::new(InterceptorChain::new()));
//!     let transport = EnhancedTransport::new(
//!         base,
//!         adapter,
//!         RateLimiter::new(RateLimitConfig::new(5.0, Scope::Provider)?),
//!         RetryConfig::new(3),
//!     );
//!
//!     let request = HttpRequest::new(Method::Get, "https://api.anthropic.com/v1/models")
//!         .with_header("x-api-key", "sk-ant-...");
//!     let response = transport.fetch(request).await?;
//!     println!("status: {}", response.status);
//!     Ok(())
//! }
//! ```

pub mod delta;
pub mod error;
pub mod interceptor;
pub mod rate_limiter;
pub mod request;
pub mod retry;
pub mod retry_after;
pub mod runtime;
pub mod sanitize;
pub mod sse;
pub mod token_bucket;
pub mod transport;
pub mod translator;

pub use delta::{ContentPart, DeltaParser, StreamDelta, ToolCallDelta, Usage};
pub use error::{CoreError, ErrorKind, NormalizeOpts, RawError, Result};
pub use interceptor::{Context, InterceptorChain};
pub use rate_limiter::{RateLimitConfig, RateLimitContext, RateLimiter, Scope};
pub use request::{Body, CancelHandle, Headers, HttpRequest, HttpResponse, Method, StreamResponse};
pub use retry::{RetryConfig, RetryContext, RetryDecision, RetryStats};
pub use runtime::{FakeRuntimeAdapter, RuntimeAdapter, TokioRuntimeAdapter};
pub use sse::{SseEvent, SseParser};
pub use token_bucket::{TokenBucket, TokenBucketConfig};
pub use transport::{BaseTransport, EnhancedTransport};
pub use translator::{RequestTranslator, ResponseParser};
