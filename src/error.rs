//! Uniform error taxonomy and normalizer.
//!
//! Every failure that leaves the core is exactly one of the eight
//! [`ErrorKind`] variants. [`normalize`] maps raw sources (cancellation,
//! transport faults, HTTP responses, structured provider bodies) onto
//! that closed set, sanitizing every message and header along the way.

use crate::request::HttpResponse;
use crate::retry_after;
use crate::sanitize;
use std::collections::HashMap;
use std::time::SystemTime;
use thiserror::Error;

/// The closed set of error kinds the core can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    RateLimit,
    Validation,
    Transport,
    Timeout,
    Overloaded,
    Provider,
    Streaming,
}

impl ErrorKind {
    /// The external error code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::Overloaded => "OVERLOADED_ERROR",
            ErrorKind::Provider => "PROVIDER_ERROR",
            ErrorKind::Streaming => "STREAMING_ERROR",
        }
    }
}

/// Additional, typed provenance attached to a [`CoreError`].
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub provider: Option<String>,
    pub provider_version: Option<String>,
    pub timestamp: Option<String>,
    pub original_error_name: Option<String>,
    pub http_status: Option<u16>,
    pub status_text: Option<String>,
    pub sanitized_headers: HashMap<String, String>,
    pub provider_subtype: Option<String>,
    pub retry_after: Option<u64>,
    pub retry_after_type: Option<&'static str>,
    pub should_retry: Option<bool>,
    pub original_error: Option<String>,
    pub aborted: bool,
    pub interceptor_phase: Option<&'static str>,
    pub interceptor_index: Option<usize>,
    pub interceptor_type: Option<&'static str>,
}

/// A normalized, sanitized error; the only error type that crosses the
/// public API boundary of this crate.
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: sanitize::sanitize_message(&message.into()),
            context: ErrorContext::default(),
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.context.aborted
    }

    pub fn status(&self) -> Option<u16> {
        self.context.http_status
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Something the normalizer can turn into a [`CoreError`]: an already-typed
/// error, a bare string, a response, or a structured provider error body.
pub enum RawError<'a> {
    Already(CoreError),
    Cancelled,
    Message(String),
    Response(&'a HttpResponse),
    ProviderBody {
        response: &'a HttpResponse,
        body: &'a serde_json::Value,
    },
}

/// Options threaded through every normalization call: provenance that
/// does not come from the raw error itself.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOpts {
    pub provider: Option<String>,
    pub provider_version: Option<String>,
    pub now: Option<SystemTime>,
}

/// Classification precedence.
pub fn normalize(raw: RawError<'_>, opts: &NormalizeOpts) -> CoreError {
    let now = opts.now.unwrap_or_else(SystemTime::now);
    let timestamp = iso8601_utc(now);

    match raw {
        RawError::Already(mut err) => {
            if err.context.provider.is_none() {
                err.context.provider = opts.provider.clone();
            }
            if err.context.provider_version.is_none() {
                err.context.provider_version = opts.provider_version.clone();
            }
            err.context.timestamp.get_or_insert(timestamp);
            err
        }
        RawError::Cancelled => CoreError::new(ErrorKind::Timeout, "request was aborted")
            .with_context(ErrorContext {
                provider: opts.provider.clone(),
                provider_version: opts.provider_version.clone(),
                timestamp: Some(timestamp),
                original_error_name: Some("AbortError".into()),
                aborted: true,
                ..Default::default()
            }),
        RawError::Message(msg) => classify_message(&msg, opts, timestamp),
        RawError::Response(resp) => classify_response(resp, None, opts, timestamp),
        RawError::ProviderBody { response, body } => {
            classify_response(response, Some(body), opts, timestamp)
        }
    }
}

fn classify_message(msg: &str, opts: &NormalizeOpts, timestamp: String) -> CoreError {
    let lower = msg.to_ascii_lowercase();
    let kind = if lower.contains("timeout") || lower.contains("etimedout") {
        ErrorKind::Timeout
    } else if lower.contains("econnrefused")
        || lower.contains("enotfound")
        || lower.contains("tls")
        || lower.contains("certificate")
    {
        ErrorKind::Transport
    } else {
        ErrorKind::Provider
    };

    CoreError::new(kind, msg).with_context(ErrorContext {
        provider: opts.provider.clone(),
        provider_version: opts.provider_version.clone(),
        timestamp: Some(timestamp),
        original_error_name: Some("Error".into()),
        original_error: Some(sanitize::sanitize_message(msg)),
        ..Default::default()
    })
}

fn status_kind(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Auth,
        404 => ErrorKind::Provider,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimit,
        529 => ErrorKind::Overloaded,
        400 | 422 | 418 => ErrorKind::Validation,
        s if s >= 500 => ErrorKind::Provider,
        s if (400..500).contains(&s) => ErrorKind::Validation,
        _ => ErrorKind::Provider,
    }
}

fn provider_subtype_kind(subtype: &str, status: u16) -> ErrorKind {
    match subtype {
        "authentication_error" => ErrorKind::Auth,
        "rate_limit_error" => ErrorKind::RateLimit,
        "overloaded_error" => {
            if status == 529 {
                ErrorKind::Overloaded
            } else {
                ErrorKind::Provider
            }
        }
        "invalid_request_error" => ErrorKind::Validation,
        "not_found_error" => ErrorKind::Provider,
        _ => status_kind(status),
    }
}

fn classify_response(
    resp: &HttpResponse,
    body: Option<&serde_json::Value>,
    opts: &NormalizeOpts,
    timestamp: String,
) -> CoreError {
    let status = resp.status;

    let (kind, subtype, message) = if let Some(value) = body.filter(|v| is_structured_error(v)) {
        let subtype = value
            .get("error")
            .and_then(|e| e.get("type"))
            .and_then(|t| t.as_str())
            .map(str::to_string);
        let msg = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string);
        let kind = subtype
            .as_deref()
            .map(|s| provider_subtype_kind(s, status))
            .unwrap_or_else(|| status_kind(status));
        (
            kind,
            subtype,
            msg.unwrap_or_else(|| status_text_message(status, &resp.status_text)),
        )
    } else {
        (
            status_kind(status),
            None,
            status_text_message(status, &resp.status_text),
        )
    };

    let sanitized_headers = sanitize::sanitize_headers(resp.headers.iter());

    let (retry_after, retry_after_type) = if matches!(status, 429 | 529) {
        resp.headers
            .get("retry-after")
            .map(|raw| {
                let parsed = retry_after::parse(raw, opts.now.unwrap_or_else(SystemTime::now));
                let kind_str = match parsed.kind {
                    crate::retry_after::RetryAfterKind::Seconds => "seconds",
                    crate::retry_after::RetryAfterKind::HttpDate => "http-date",
                    crate::retry_after::RetryAfterKind::Unknown => "unknown",
                };
                (Some(parsed.seconds), Some(kind_str))
            })
            .unwrap_or((None, None))
    } else {
        (None, None)
    };

    let should_retry = matches!(kind, ErrorKind::Overloaded).then_some(true);

    CoreError::new(kind, message).with_context(ErrorContext {
        provider: opts.provider.clone(),
        provider_version: opts.provider_version.clone(),
        timestamp: Some(timestamp),
        original_error_name: Some("HttpResponseError".into()),
        http_status: Some(status),
        status_text: Some(resp.status_text.clone()),
        sanitized_headers,
        provider_subtype: subtype,
        retry_after,
        retry_after_type,
        should_retry,
        ..Default::default()
    })
}

fn is_structured_error(value: &serde_json::Value) -> bool {
    value.get("type").and_then(|t| t.as_str()) == Some("error") && value.get("error").is_some()
}

fn status_text_message(status: u16, status_text: &str) -> String {
    let friendly = match status {
        400 => Some("The request was invalid."),
        401 => Some("Authentication failed."),
        403 => Some("Access to this resource is forbidden."),
        404 => Some("The requested resource was not found."),
        408 => Some("The request timed out."),
        418 => Some("The request was invalid."),
        422 => Some("The request could not be processed."),
        429 => Some("Rate limit exceeded."),
        500 => Some("The provider encountered an internal error."),
        502 => Some("The provider's upstream gateway failed."),
        503 => Some("The provider is temporarily unavailable."),
        504 => Some("The provider's upstream gateway timed out."),
        529 => Some("The provider is overloaded."),
        _ => None,
    };
    match friendly {
        Some(text) => text.to_string(),
        None => format!("HTTP {}: {}", status, status_text),
    }
}

fn iso8601_utc(now: SystemTime) -> String {
    let since_epoch = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs();
    let (year, month, day, hour, minute, second) = civil_from_unix(secs);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year, month, day, hour, minute, second
    )
}

/// Inverse of `days_from_civil` in `retry_after.rs`, extended with time-of-day.
fn civil_from_unix(secs: u64) -> (u64, u64, u64, u64, u64, u64) {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let z = days as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365; // [0, 399]
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11]
    let d = doy - (153 * mp + 2) / 5 + 1; // [1, 31]
    let m = if mp < 10 { mp + 3 } else { mp - 9 }; // [1, 12]
    let y = if m <= 2 { y + 1 } else { y };

    (y as u64, m, d, hour, minute, second)
}
