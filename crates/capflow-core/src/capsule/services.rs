//! External services reachable from capsule bodies.
//!
//! The trait is defined here and implemented in capflow-infra against real
//! HTTP endpoints and LLM providers. `SimulatedServices` answers every call
//! locally and is what `test_run` hands to a capsule, so a test run never
//! touches a real external system.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::json;

/// Outbound HTTP request issued by a capsule.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Option<Duration>,
}

/// Response to an `HttpRequestSpec`.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponseData {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponseData {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Single-turn completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmPrompt {
    pub system: Option<String>,
    pub prompt: String,
    /// Overrides the configured default model.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Failure reported by a service backend.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("service not configured: {0}")]
    NotConfigured(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'a>>;

/// Backends a capsule may call while executing.
pub trait CapsuleServices: Send + Sync {
    fn http_request(&self, request: HttpRequestSpec) -> ServiceFuture<'_, HttpResponseData>;

    fn llm_complete(&self, prompt: LlmPrompt) -> ServiceFuture<'_, String>;
}

/// Local stand-in for every backend.
///
/// HTTP calls echo the request as a JSON body with status 200; completions
/// return a deterministic summary of the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedServices;

impl CapsuleServices for SimulatedServices {
    fn http_request(&self, request: HttpRequestSpec) -> ServiceFuture<'_, HttpResponseData> {
        Box::pin(async move {
            let body = json!({
                "simulated": true,
                "method": request.method,
                "url": request.url,
                "request_body": request.body,
            });
            Ok(HttpResponseData {
                status: 200,
                headers: BTreeMap::from([(
                    "content-type".to_string(),
                    "application/json".to_string(),
                )]),
                body: body.to_string(),
            })
        })
    }

    fn llm_complete(&self, prompt: LlmPrompt) -> ServiceFuture<'_, String> {
        Box::pin(async move {
            let preview: String = prompt.prompt.chars().take(80).collect();
            Ok(format!("[simulated completion] {preview}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_http_echoes_request() {
        let response = SimulatedServices
            .http_request(HttpRequestSpec {
                method: "POST".to_string(),
                url: "https://example.com/api".to_string(),
                headers: BTreeMap::new(),
                body: Some("{}".to_string()),
                timeout: None,
            })
            .await
            .unwrap();
        assert!(response.is_success());
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["simulated"], true);
        assert_eq!(body["url"], "https://example.com/api");
    }

    #[tokio::test]
    async fn simulated_completion_is_deterministic() {
        let prompt = LlmPrompt {
            system: None,
            prompt: "Summarize the quarterly numbers".to_string(),
            model: None,
            temperature: None,
            max_tokens: None,
        };
        let a = SimulatedServices.llm_complete(prompt.clone()).await.unwrap();
        let b = SimulatedServices.llm_complete(prompt).await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains("quarterly"));
    }
}
