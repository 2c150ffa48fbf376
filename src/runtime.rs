//! Runtime Adapter: the only source of time, randomness, and I/O the core
//! depends on.
//!
//! Grounded on the teacher's `backend::Backend` trait, an `async-trait`
//! object-safe capability surface swapped out for a fake in tests, here
//! narrowed to the five primitives the transport layer actually needs so
//! the core stays portable across hosts.

use crate::error::{self, CoreError, ErrorKind, NormalizeOpts, RawError, Result};
use crate::request::{CancelHandle, Chunk, HttpResponse, StreamResponse};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Request options the adapter's `fetch`/`stream` need beyond the URL.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: crate::request::Method,
    pub headers: crate::request::Headers,
    pub body: Option<crate::request::Body>,
    pub cancel: Option<CancelHandle>,
}

#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Sleep for `ms` milliseconds, or fail early with an aborted error if
    /// `cancel` is signalled first.
    async fn sleep(&self, ms: u64, cancel: Option<&CancelHandle>) -> Result<()>;

    /// Monotonic milliseconds, not tied to wall-clock time.
    fn now(&self) -> u64;

    async fn fetch(&self, url: &str, opts: FetchOptions) -> Result<HttpResponse>;

    async fn stream(&self, url: &str, opts: FetchOptions) -> Result<StreamResponse>;

    /// Uniform random sample in `[0, 1)`, used for retry jitter.
    fn random_uniform(&self) -> f64;
}

/// Real adapter backed by `tokio::time` and `reqwest`.
pub struct TokioRuntimeAdapter {
    client: reqwest::Client,
}

impl TokioRuntimeAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for TokioRuntimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn method_to_reqwest(method: crate::request::Method) -> reqwest::Method {
    use crate::request::Method as M;
    match method {
        M::Get => reqwest::Method::GET,
        M::Post => reqwest::Method::POST,
        M::Put => reqwest::Method::PUT,
        M::Patch => reqwest::Method::PATCH,
        M::Delete => reqwest::Method::DELETE,
    }
}

fn build_request(
    client: &reqwest::Client,
    url: &str,
    opts: &FetchOptions,
) -> reqwest::RequestBuilder {
    let mut builder = client.request(method_to_reqwest(opts.method), url);
    for (name, value) in opts.headers.iter() {
        builder = builder.header(name, value);
    }
    if let Some(body) = &opts.body {
        builder = builder.body(body.as_bytes().to_vec());
    }
    builder
}

fn response_headers(resp: &reqwest::Response) -> crate::request::Headers {
    resp.headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                v.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

#[async_trait]
impl RuntimeAdapter for TokioRuntimeAdapter {
    async fn sleep(&self, ms: u64, cancel: Option<&CancelHandle>) -> Result<()> {
        let duration = Duration::from_millis(ms);
        let poll_interval = Duration::from_millis(20.min(ms.max(1)));
        let Some(cancel) = cancel else {
            tokio::time::sleep(duration).await;
            return Ok(());
        };

        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if cancel.is_cancelled() {
                return Err(CoreError::new(ErrorKind::Timeout, "sleep aborted").with_context(
                    crate::error::ErrorContext {
                        aborted: true,
                        ..Default::default()
                    },
                ));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    async fn fetch(&self, url: &str, opts: FetchOptions) -> Result<HttpResponse> {
        let cancel = opts.cancel.clone();
        if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(error::normalize(RawError::Cancelled, &NormalizeOpts::default()));
        }

        let response = build_request(&self.client, url, &opts)
            .send()
            .await
            .map_err(|e| error::normalize(RawError::Message(e.to_string()), &NormalizeOpts::default()))?;

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();
        let headers = response_headers(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| error::normalize(RawError::Message(e.to_string()), &NormalizeOpts::default()))?;

        Ok(HttpResponse {
            status,
            status_text,
            headers,
            body: Some(body.to_vec()),
        })
    }

    async fn stream(&self, url: &str, opts: FetchOptions) -> Result<StreamResponse> {
        let cancel = opts.cancel.clone();
        if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(error::normalize(RawError::Cancelled, &NormalizeOpts::default()));
        }

        let response = build_request(&self.client, url, &opts)
            .send()
            .await
            .map_err(|e| error::normalize(RawError::Message(e.to_string()), &NormalizeOpts::default()))?;

        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();
        let headers = response_headers(&response);

        let byte_stream = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|b| b.to_vec() as Chunk)
                .map_err(|e| error::normalize(RawError::Message(e.to_string()), &NormalizeOpts::default()))
        });

        Ok(StreamResponse {
            status,
            status_text,
            headers,
            body: Box::pin(byte_stream),
        })
    }

    fn random_uniform(&self) -> f64 {
        fastrand::f64()
    }
}

/// One queued scripted stream response: status, status text, and body chunks.
type ScriptedStream = (u16, String, Vec<Chunk>);

/// A scripted, deterministic adapter for tests: virtual clock, queued
/// fetch/stream responses, fixed jitter sample.
pub struct FakeRuntimeAdapter {
    virtual_ms: AtomicU64,
    fetch_responses: Mutex<Vec<Result<HttpResponse>>>,
    stream_responses: Mutex<Vec<Result<ScriptedStream>>>,
    jitter: f64,
}

impl FakeRuntimeAdapter {
    pub fn new() -> Self {
        Self {
            virtual_ms: AtomicU64::new(0),
            fetch_responses: Mutex::new(Vec::new()),
            stream_responses: Mutex::new(Vec::new()),
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Queue the next `fetch` result, consumed in FIFO order.
    pub fn push_fetch_response(&self, response: Result<HttpResponse>) {
        self.fetch_responses.lock().unwrap().push(response);
    }

    /// Queue the next `stream` result as `(status, status_text, chunks)`.
    pub fn push_stream_response(&self, response: Result<(u16, String, Vec<Chunk>)>) {
        self.stream_responses.lock().unwrap().push(response);
    }

    pub fn advance(&self, ms: u64) {
        self.virtual_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Default for FakeRuntimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeAdapter for FakeRuntimeAdapter {
    async fn sleep(&self, ms: u64, cancel: Option<&CancelHandle>) -> Result<()> {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(CoreError::new(ErrorKind::Timeout, "sleep aborted").with_context(
                crate::error::ErrorContext {
                    aborted: true,
                    ..Default::default()
                },
            ));
        }
        self.advance(ms);
        Ok(())
    }

    fn now(&self) -> u64 {
        self.virtual_ms.load(Ordering::SeqCst)
    }

    async fn fetch(&self, _url: &str, opts: FetchOptions) -> Result<HttpResponse> {
        if opts.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(error::normalize(RawError::Cancelled, &NormalizeOpts::default()));
        }
        let mut queue = self.fetch_responses.lock().unwrap();
        if queue.is_empty() {
            return Err(CoreError::new(
                ErrorKind::Transport,
                "fake adapter has no queued fetch response",
            ));
        }
        queue.remove(0)
    }

    async fn stream(&self, _url: &str, opts: FetchOptions) -> Result<StreamResponse> {
        if opts.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(error::normalize(RawError::Cancelled, &NormalizeOpts::default()));
        }
        let mut queue = self.stream_responses.lock().unwrap();
        if queue.is_empty() {
            return Err(CoreError::new(
                ErrorKind::Transport,
                "fake adapter has no queued stream response",
            ));
        }
        let (status, status_text, chunks) = queue.remove(0)?;
        let body = stream::iter(chunks.into_iter().map(Ok));
        Ok(StreamResponse {
            status,
            status_text,
            headers: crate::request::Headers::new(),
            body: Box::pin(body),
        })
    }

    fn random_uniform(&self) -> f64 {
        self.jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Headers, Method};

    fn opts() -> FetchOptions {
        FetchOptions {
            method: Method::Get,
            headers: Headers::new(),
            body: None,
            cancel: None,
        }
    }

    #[tokio::test]
    async fn fake_adapter_replays_queued_fetch_responses_in_order() {
        let adapter = FakeRuntimeAdapter::new();
        adapter.push_fetch_response(Ok(HttpResponse {
            status: 200,
            status_text: "OK".into(),
            headers: Headers::new(),
            body: Some(b"first".to_vec()),
        }));
        adapter.push_fetch_response(Ok(HttpResponse {
            status: 500,
            status_text: "Internal Server Error".into(),
            headers: Headers::new(),
            body: None,
        }));

        let first = adapter.fetch("https://x", opts()).await.unwrap();
        assert_eq!(first.status, 200);
        let second = adapter.fetch("https://x", opts()).await.unwrap();
        assert_eq!(second.status, 500);
    }

    #[tokio::test]
    async fn fake_adapter_sleep_advances_virtual_clock() {
        let adapter = FakeRuntimeAdapter::new();
        assert_eq!(adapter.now(), 0);
        adapter.sleep(500, None).await.unwrap();
        assert_eq!(adapter.now(), 500);
    }

    #[tokio::test]
    async fn fake_adapter_sleep_fails_fast_when_cancelled() {
        let adapter = FakeRuntimeAdapter::new();
        let cancel = CancelHandle::new();
        cancel.cancel();
        let result = adapter.sleep(1000, Some(&cancel)).await;
        assert!(result.is_err());
        assert_eq!(adapter.now(), 0);
    }

    #[tokio::test]
    async fn fake_adapter_fetch_rejects_immediately_when_pre_cancelled() {
        let adapter = FakeRuntimeAdapter::new();
        let cancel = CancelHandle::new();
        cancel.cancel();
        let mut call_opts = opts();
        call_opts.cancel = Some(cancel);
        let result = adapter.fetch("https://x", call_opts).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fake_adapter_streams_queued_chunks_in_order() {
        let adapter = FakeRuntimeAdapter::new();
        adapter.push_stream_response(Ok((
            200,
            "OK".to_string(),
            vec![b"a".to_vec(), b"b".to_vec()],
        )));
        let mut stream = adapter.stream("https://x", opts()).await.unwrap();
        let chunk1 = stream.body.next().await.unwrap().unwrap();
        let chunk2 = stream.body.next().await.unwrap().unwrap();
        assert_eq!(chunk1, b"a");
        assert_eq!(chunk2, b"b");
    }

    #[test]
    fn fixed_jitter_is_returned_verbatim() {
        let adapter = FakeRuntimeAdapter::new().with_jitter(0.42);
        assert_eq!(adapter.random_uniform(), 0.42);
    }
}
