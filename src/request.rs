//! Wire-level request/response types (§3 of the transport core).
//!
//! These are intentionally provider-agnostic: a [`RequestTranslator`](crate::translator::RequestTranslator)
//! produces an [`HttpRequest`], and the transport returns an [`HttpResponse`]
//! or [`StreamResponse`]. Headers are a case-insensitive logical map on
//! input; emission preserves the case the caller supplied.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Cooperative cancellation handle threaded through every layer of the core.
///
/// Cloning shares the same underlying flag; setting it on any clone signals
/// cancellation to all holders.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Create a fresh, unsignalled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Case-insensitive header map. Keys are looked up lowercased but the
/// originally-supplied case is retained for emission.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let lower = name.to_ascii_lowercase();
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
        {
            *existing = (name, value.into());
        } else {
            self.entries.push((name, value.into()));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let lower = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| k.to_ascii_lowercase() == lower)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return a copy with every sensitive header's value replaced by `[REDACTED]`.
    pub fn sanitized(&self) -> HashMap<String, String> {
        crate::sanitize::sanitize_headers(self.iter())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut h = Headers::new();
        for (k, v) in iter {
            h.insert(k, v);
        }
        h
    }
}

/// Request body: either raw bytes or a UTF-8 string (callers that already
/// have JSON text avoid a decode/re-encode round trip).
#[derive(Debug, Clone)]
pub enum Body {
    Bytes(Vec<u8>),
    Text(String),
}

impl Body {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Bytes(b) => b,
            Body::Text(s) => s.as_bytes(),
        }
    }

    /// Parse the body as JSON, if it looks like JSON text.
    pub fn as_json(&self) -> Option<serde_json::Value> {
        let text = match self {
            Body::Text(s) => s.as_str(),
            Body::Bytes(b) => std::str::from_utf8(b).ok()?,
        };
        serde_json::from_str(text).ok()
    }
}

/// An outgoing HTTP request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: Method,
    pub headers: Headers,
    pub body: Option<Body>,
    pub cancel: Option<CancelHandle>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Headers::new(),
            body: None,
            cancel: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// A completed, non-streaming HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }
}

/// A single chunk of a streaming response body.
pub type Chunk = Vec<u8>;

/// A streaming HTTP response: header fields plus a single-consumer,
/// non-restartable byte stream.
pub struct StreamResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: futures::stream::BoxStream<'static, crate::error::Result<Chunk>>,
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .finish()
    }
}

impl StreamResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}
