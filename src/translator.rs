//! Translator trait contracts.
//!
//! Only the seams are defined here; concrete provider translators
//! (OpenAI, Anthropic, Ollama request/response shaping) sit above this
//! core and are out of scope, matching the teacher's own
//! `backend::Backend` split between trait and concrete adapter.

use crate::error::Result;
use crate::request::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::Value;

/// Turns a domain request (provider-agnostic JSON) plus provider config into
/// a wire-level [`HttpRequest`]. Implementations must produce an absolute
/// URL, a valid method, a JSON or byte body, and headers carrying the
/// authentication credential; unsupported content shapes are rejected with
/// a `Validation` error.
#[async_trait]
pub trait RequestTranslator: Send + Sync {
    async fn translate(&self, domain_request: &Value, config: &Value) -> Result<HttpRequest>;
}

/// Parses a completed, non-streaming [`HttpResponse`] into a domain
/// response shape. Streaming responses are instead driven through the SSE
/// Parser and Delta Parser.
#[async_trait]
pub trait ResponseParser: Send + Sync {
    async fn parse(&self, response: &HttpResponse, raw_body_text: &str) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    struct EchoTranslator;

    #[async_trait]
    impl RequestTranslator for EchoTranslator {
        async fn translate(&self, domain_request: &Value, _config: &Value) -> Result<HttpRequest> {
            let url = domain_request
                .get("url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    crate::error::CoreError::new(
                        crate::error::ErrorKind::Validation,
                        "missing url field",
                    )
                })?;
            Ok(HttpRequest::new(Method::Post, url))
        }
    }

    struct EchoParser;

    #[async_trait]
    impl ResponseParser for EchoParser {
        async fn parse(&self, response: &HttpResponse, raw_body_text: &str) -> Result<Value> {
            Ok(serde_json::json!({
                "status": response.status,
                "body": raw_body_text,
            }))
        }
    }

    #[tokio::test]
    async fn translator_rejects_missing_url_as_validation_error() {
        let translator = EchoTranslator;
        let err = translator
            .translate(&serde_json::json!({}), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn translator_produces_absolute_url_request() {
        let translator = EchoTranslator;
        let req = translator
            .translate(
                &serde_json::json!({"url": "https://api.example.com/v1/chat"}),
                &serde_json::json!({}),
            )
            .await
            .unwrap();
        assert_eq!(req.url, "https://api.example.com/v1/chat");
    }

    #[tokio::test]
    async fn parser_roundtrips_status_and_body() {
        let parser = EchoParser;
        let resp = HttpResponse {
            status: 200,
            status_text: "OK".into(),
            headers: crate::request::Headers::new(),
            body: None,
        };
        let value = parser.parse(&resp, "hello").await.unwrap();
        assert_eq!(value["status"], 200);
        assert_eq!(value["body"], "hello");
    }
}
