//! Live capsule services: real outbound HTTP and an OpenAI-compatible
//! completion backend.
//!
//! - `chat` -- request/response types for `/chat/completions`

pub mod chat;

use std::collections::BTreeMap;
use std::time::Duration;

use capflow_core::capsule::services::{
    CapsuleServices, HttpRequestSpec, HttpResponseData, LlmPrompt, ServiceError, ServiceFuture,
};
use capflow_types::config::LlmSettings;
use secrecy::{ExposeSecret, SecretString};

use self::chat::{ChatRequest, ChatResponse};

/// Applied when a request does not carry its own timeout.
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// LLM calls can run long.
const LLM_TIMEOUT: Duration = Duration::from_secs(300);

/// `CapsuleServices` backed by `reqwest`.
///
/// The LLM API key is held as a [`SecretString`] and is only exposed when
/// building the `Authorization` header. Debug is deliberately not derived.
pub struct LiveCapsuleServices {
    client: reqwest::Client,
    llm: LlmSettings,
    api_key: Option<SecretString>,
}

impl LiveCapsuleServices {
    /// Build from settings, reading the API key from `llm.api_key_env`.
    /// A missing key only disables completions.
    pub fn from_settings(llm: LlmSettings) -> Result<Self, ServiceError> {
        let api_key = std::env::var(&llm.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);
        if api_key.is_none() {
            tracing::info!(env = %llm.api_key_env, "no LLM API key configured; llm capsules will fail");
        }
        Self::new(llm, api_key)
    }

    pub fn new(llm: LlmSettings, api_key: Option<SecretString>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("capflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { client, llm, api_key })
    }

    async fn send(&self, request: HttpRequestSpec) -> Result<HttpResponseData, ServiceError> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ServiceError::Request(format!("invalid HTTP method '{}'", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout.unwrap_or(DEFAULT_HTTP_TIMEOUT));
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ServiceError::Request(format!("{} {}: {e}", request.method, request.url)))?;

        let status = response.status().as_u16();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::InvalidResponse(format!("read body: {e}")))?;

        tracing::debug!(url = %request.url, status, bytes = body.len(), "capsule HTTP request finished");
        Ok(HttpResponseData { status, headers, body })
    }

    async fn complete(&self, prompt: LlmPrompt) -> Result<String, ServiceError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ServiceError::NotConfigured(format!("LLM API key ({})", self.llm.api_key_env)))?;

        let body = ChatRequest::from_prompt(prompt, &self.llm.model);
        let url = format!("{}/chat/completions", self.llm.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .timeout(LLM_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Request(format!("completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Request(format!("HTTP {status}: {error_body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(format!("failed to parse completion: {e}")))?;
        parsed.into_text()
    }
}

impl CapsuleServices for LiveCapsuleServices {
    fn http_request(&self, request: HttpRequestSpec) -> ServiceFuture<'_, HttpResponseData> {
        Box::pin(self.send(request))
    }

    fn llm_complete(&self, prompt: LlmPrompt) -> ServiceFuture<'_, String> {
        Box::pin(self.complete(prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port and return its base URL.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    fn services(base_url: &str, key: Option<&str>) -> LiveCapsuleServices {
        let llm = LlmSettings {
            base_url: base_url.to_string(),
            ..LlmSettings::default()
        };
        LiveCapsuleServices::new(llm, key.map(SecretString::from)).unwrap()
    }

    fn get(url: String) -> HttpRequestSpec {
        HttpRequestSpec {
            method: "get".to_string(),
            url,
            headers: BTreeMap::from([("accept".to_string(), "application/json".to_string())]),
            body: None,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[tokio::test]
    async fn http_request_returns_status_headers_and_body() {
        let base = one_shot_server("HTTP/1.1 201 Created", r#"{"ok":true}"#).await;
        let response = services("http://unused", None)
            .http_request(get(format!("{base}/items")))
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.headers["content-type"], "application/json");
        assert_eq!(response.body, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let mut request = get("http://127.0.0.1:9/".to_string());
        request.method = "NOT A METHOD".to_string();
        let err = services("http://unused", None).http_request(request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Request(_)));
    }

    #[tokio::test]
    async fn completion_without_key_is_not_configured() {
        let prompt = LlmPrompt {
            system: None,
            prompt: "hi".to_string(),
            model: None,
            temperature: None,
            max_tokens: None,
        };
        let err = services("http://unused", None).llm_complete(prompt).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn completion_reads_first_choice() {
        let base = one_shot_server(
            "HTTP/1.1 200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"Three incidents, all resolved."}}]}"#,
        )
        .await;
        let prompt = LlmPrompt {
            system: Some("Summarize.".to_string()),
            prompt: "incident log".to_string(),
            model: Some("local-model".to_string()),
            temperature: None,
            max_tokens: Some(64),
        };
        let text = services(&base, Some("test-key")).llm_complete(prompt).await.unwrap();
        assert_eq!(text, "Three incidents, all resolved.");
    }

    #[tokio::test]
    async fn completion_error_status_is_reported() {
        let base = one_shot_server("HTTP/1.1 401 Unauthorized", r#"{"error":"bad key"}"#).await;
        let prompt = LlmPrompt {
            system: None,
            prompt: "x".to_string(),
            model: None,
            temperature: None,
            max_tokens: None,
        };
        let err = services(&base, Some("wrong")).llm_complete(prompt).await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
