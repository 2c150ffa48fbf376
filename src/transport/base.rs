//! Base HTTP Transport: builds a [`Context`], runs the
//! interceptor chain around a single Runtime Adapter call, and returns the
//! raw result. Grounded on the teacher's `backend::Backend::complete` /
//! `complete_streaming` split between a plain call and a byte-stream call.

use crate::error::{CoreError, ErrorContext, ErrorKind, Result};
use crate::interceptor::{Context, InterceptorChain};
use crate::request::{Headers, HttpRequest, HttpResponse, StreamResponse};
use crate::runtime::{FetchOptions, RuntimeAdapter};
use std::sync::Arc;

/// Lowercase every header key, matching the internal Response shape's
/// contract.
fn lowercase_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect()
}

fn to_fetch_options(request: &HttpRequest) -> FetchOptions {
    FetchOptions {
        method: request.method,
        headers: request.headers.clone(),
        body: request.body.clone(),
        cancel: request.cancel.clone(),
    }
}

fn aborted_error() -> CoreError {
    CoreError::new(ErrorKind::Transport, "Request was aborted").with_context(ErrorContext {
        aborted: true,
        ..Default::default()
    })
}

pub struct BaseTransport<A: RuntimeAdapter> {
    adapter: Arc<A>,
    interceptors: Arc<InterceptorChain>,
}

impl<A: RuntimeAdapter> BaseTransport<A> {
    pub fn new(adapter: Arc<A>, interceptors: Arc<InterceptorChain>) -> Self {
        Self {
            adapter,
            interceptors,
        }
    }

    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        if request.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            tracing::debug!(url = %request.url, "request aborted before send");
            return Err(aborted_error());
        }

        let ctx = Context::new(request);
        tracing::debug!(
            url = %ctx.request.url,
            method = ctx.request.method.as_str(),
            headers = ?ctx.request.headers.sanitized(),
            "request start"
        );
        let ctx = self.interceptors.execute_request(ctx).await?;

        let opts = to_fetch_options(&ctx.request);
        let raw = self.adapter.fetch(&ctx.request.url, opts).await;
        let response = match raw {
            Ok(resp) => resp,
            Err(err) => {
                tracing::debug!(error = %err.message, "request failed");
                return Err(err);
            }
        };

        let response = HttpResponse {
            status: response.status,
            status_text: response.status_text,
            headers: lowercase_headers(&response.headers),
            body: response.body,
        };

        tracing::debug!(
            status = response.status,
            headers = ?response.headers.sanitized(),
            "request end"
        );

        let mut ctx = ctx;
        ctx.response = Some(response);
        let ctx = self.interceptors.execute_response(ctx).await?;
        Ok(ctx.response.expect("response interceptor chain preserves the response it required"))
    }

    pub async fn stream(&self, request: HttpRequest) -> Result<StreamResponse> {
        if request.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            tracing::debug!(url = %request.url, "stream aborted before send");
            return Err(aborted_error());
        }

        let ctx = Context::new(request);
        tracing::debug!(url = %ctx.request.url, method = ctx.request.method.as_str(), "stream start");
        let ctx = self.interceptors.execute_request(ctx).await?;

        let opts = to_fetch_options(&ctx.request);
        let stream = self.adapter.stream(&ctx.request.url, opts).await?;

        if !(200..400).contains(&stream.status) {
            tracing::debug!(status = stream.status, "stream rejected by status check");
            return Err(CoreError::new(
                ErrorKind::Transport,
                format!("HTTP {}: {}", stream.status, stream.status_text),
            ));
        }

        let head = HttpResponse {
            status: stream.status,
            status_text: stream.status_text.clone(),
            headers: lowercase_headers(&stream.headers),
            body: None,
        };
        tracing::debug!(status = head.status, headers = ?head.headers.sanitized(), "stream headers received");

        let mut head_ctx = ctx;
        head_ctx.response = Some(head);
        self.interceptors.execute_response(head_ctx).await?;

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;
    use crate::runtime::FakeRuntimeAdapter;

    fn transport(adapter: FakeRuntimeAdapter) -> BaseTransport<FakeRuntimeAdapter> {
        BaseTransport::new(Arc::new(adapter), Arc::new(InterceptorChain::new()))
    }

    #[tokio::test]
    async fn fetch_returns_lowercased_headers() {
        let adapter = FakeRuntimeAdapter::new();
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        adapter.push_fetch_response(Ok(HttpResponse {
            status: 200,
            status_text: "OK".into(),
            headers,
            body: Some(b"{}".to_vec()),
        }));
        let transport = transport(adapter);
        let response = transport
            .fetch(HttpRequest::new(Method::Get, "https://api.x/v1/echo"))
            .await
            .unwrap();
        assert_eq!(response.headers.get("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn fetch_fails_immediately_on_pre_cancelled_request() {
        let adapter = FakeRuntimeAdapter::new();
        let transport = transport(adapter);
        let cancel = crate::request::CancelHandle::new();
        cancel.cancel();
        let request = HttpRequest::new(Method::Get, "https://api.x/v1/echo").with_cancel(cancel);
        let err = transport.fetch(request).await.unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn stream_rejects_non_success_status_without_reading_body() {
        let adapter = FakeRuntimeAdapter::new();
        adapter.push_stream_response(Ok((503, "Service Unavailable".to_string(), vec![])));
        let transport = transport(adapter);
        let err = transport
            .stream(HttpRequest::new(Method::Get, "https://api.x/v1/stream"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transport);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn stream_passes_through_body_untouched_on_success() {
        use futures::StreamExt;
        let adapter = FakeRuntimeAdapter::new();
        adapter.push_stream_response(Ok((
            200,
            "OK".to_string(),
            vec![b"data: hi\n\n".to_vec()],
        )));
        let transport = transport(adapter);
        let mut stream = transport
            .stream(HttpRequest::new(Method::Get, "https://api.x/v1/stream"))
            .await
            .unwrap();
        let chunk = stream.body.next().await.unwrap().unwrap();
        assert_eq!(chunk, b"data: hi\n\n");
    }

    #[tokio::test]
    async fn request_interceptor_runs_before_adapter_call() {
        let adapter = FakeRuntimeAdapter::new();
        adapter.push_fetch_response(Ok(HttpResponse {
            status: 200,
            status_text: "OK".into(),
            headers: Headers::new(),
            body: None,
        }));
        let interceptors = Arc::new(InterceptorChain::new());
        interceptors.add_request(0, |mut ctx| async move {
            ctx.request.headers.insert("X-Injected", "1");
            Ok(ctx)
        });
        let transport = BaseTransport::new(Arc::new(adapter), interceptors);
        transport
            .fetch(HttpRequest::new(Method::Get, "https://api.x/v1/echo"))
            .await
            .unwrap();
    }
}
