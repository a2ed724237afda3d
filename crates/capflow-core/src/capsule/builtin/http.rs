use std::collections::BTreeMap;
use std::time::Duration;

use capflow_types::artifact::SlotDataType;
use capflow_types::capsule::{CapsuleCategory, CapsuleTypeMeta, ConfigFieldType};
use serde_json::{Value, json};

use super::{field, required, slot, with_default, with_help, with_options};
use crate::capsule::behavior::{Capsule, CapsuleContext, CapsuleOutput, CapsuleRunError, value_to_text};
use crate::capsule::services::HttpRequestSpec;
use crate::capsule::template::TemplateScope;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Calls an HTTP endpoint through `CapsuleServices::http_request`.
pub struct HttpRequestCapsule {
    meta: CapsuleTypeMeta,
}

impl HttpRequestCapsule {
    pub const TYPE_KEY: &'static str = "http-request";

    pub fn new() -> Self {
        Self {
            meta: CapsuleTypeMeta {
                type_key: Self::TYPE_KEY.to_string(),
                name: "HTTP Request".to_string(),
                description: "Calls an HTTP endpoint and emits the response".to_string(),
                icon: "globe".to_string(),
                category: CapsuleCategory::Processor,
                config_schema: vec![
                    with_help(
                        required(field("url", "URL", ConfigFieldType::Url)),
                        "Supports {{vars.x}} and {{inputs.slot}} placeholders",
                    ),
                    with_options(
                        with_default(field("method", "Method", ConfigFieldType::Select), json!("GET")),
                        &["GET", "POST", "PUT", "PATCH", "DELETE"],
                    ),
                    field("headers", "Headers", ConfigFieldType::Json),
                    field("body", "Body", ConfigFieldType::Textarea),
                    with_default(
                        field("timeout_secs", "Timeout (seconds)", ConfigFieldType::Number),
                        json!(DEFAULT_TIMEOUT_SECS),
                    ),
                    with_default(
                        field("fail_on_error_status", "Fail on 4xx/5xx", ConfigFieldType::Boolean),
                        json!(true),
                    ),
                ],
                default_inputs: vec![slot("body", "Request body", SlotDataType::Any, false)],
                default_outputs: vec![
                    slot("response", "Response", SlotDataType::Json, false),
                    slot("body", "Response body", SlotDataType::Text, false),
                ],
                testable: true,
            },
        }
    }
}

impl Default for HttpRequestCapsule {
    fn default() -> Self {
        Self::new()
    }
}

impl Capsule for HttpRequestCapsule {
    fn meta(&self) -> &CapsuleTypeMeta {
        &self.meta
    }

    async fn execute(&self, ctx: CapsuleContext<'_>) -> Result<CapsuleOutput, CapsuleRunError> {
        let scope = TemplateScope {
            inputs: ctx.inputs,
            variables: ctx.variables,
        };

        let url = scope.render(ctx.require_str("url")?);
        let method = ctx.config_str("method").unwrap_or("GET").to_uppercase();

        let headers: BTreeMap<String, String> = match ctx.config.get("headers") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| (k.clone(), scope.render(&value_to_text(v))))
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => {
                serde_json::from_str::<BTreeMap<String, String>>(s)
                    .map_err(|e| CapsuleRunError::Config(format!("headers: {e}")))?
                    .into_iter()
                    .map(|(k, v)| (k, scope.render(&v)))
                    .collect()
            }
            _ => BTreeMap::new(),
        };

        // An upstream payload on the `body` input wins over the configured body.
        let body = match ctx.input_text("body") {
            Some(text) => Some(text),
            None => ctx.config_str("body").map(|b| scope.render(b)),
        };

        let timeout_secs = match ctx.config.get("timeout_secs") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let fail_on_error_status = ctx
            .config
            .get("fail_on_error_status")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let response = ctx
            .services
            .http_request(HttpRequestSpec {
                method: method.clone(),
                url: url.clone(),
                headers,
                body,
                timeout: Some(Duration::from_secs(timeout_secs)),
            })
            .await?;

        if fail_on_error_status && !response.is_success() {
            return Err(CapsuleRunError::Failed(format!(
                "{method} {url} returned status {}",
                response.status
            )));
        }

        let parsed_body =
            serde_json::from_str::<Value>(&response.body).unwrap_or(Value::String(response.body.clone()));
        let status = response.status;

        Ok(CapsuleOutput::new()
            .with_json(
                "response",
                json!({
                    "status": status,
                    "headers": response.headers,
                    "body": parsed_body,
                }),
            )
            .with_text("body", response.body, "text/plain")
            .log(format!("{method} {url} -> {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::services::{
        CapsuleServices, HttpResponseData, LlmPrompt, ServiceError, SimulatedServices,
    };
    use std::collections::HashMap;
    use std::future::Future;
    use std::pin::Pin;

    struct StatusServices(u16);

    impl CapsuleServices for StatusServices {
        fn http_request(
            &self,
            _request: HttpRequestSpec,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponseData, ServiceError>> + Send + '_>>
        {
            let status = self.0;
            Box::pin(async move {
                Ok(HttpResponseData {
                    status,
                    headers: BTreeMap::new(),
                    body: "nope".to_string(),
                })
            })
        }

        fn llm_complete(
            &self,
            _prompt: LlmPrompt,
        ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
            Box::pin(async { Err(ServiceError::NotConfigured("llm".to_string())) })
        }
    }

    fn config(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn renders_url_template_and_parses_json_body() {
        let capsule = HttpRequestCapsule::new();
        let config = config(json!({"url": "https://api.example.com/{{vars.topic}}", "method": "post"}));
        let variables = config_vars();
        let inputs = HashMap::new();
        let output = capsule
            .execute(CapsuleContext {
                node_id: "fetch",
                config: &config,
                inputs: &inputs,
                variables: &variables,
                services: &SimulatedServices,
            })
            .await
            .unwrap();

        let response = output.to_json()["response"].clone();
        assert_eq!(response["status"], 200);
        assert_eq!(response["body"]["url"], "https://api.example.com/rust");
        assert_eq!(response["body"]["method"], "POST");
    }

    fn config_vars() -> serde_json::Map<String, Value> {
        json!({"topic": "rust"}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn error_status_fails_attempt() {
        let capsule = HttpRequestCapsule::new();
        let config = config(json!({"url": "https://api.example.com"}));
        let variables = serde_json::Map::new();
        let inputs = HashMap::new();
        let err = capsule
            .execute(CapsuleContext {
                node_id: "fetch",
                config: &config,
                inputs: &inputs,
                variables: &variables,
                services: &StatusServices(503),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn error_status_tolerated_when_disabled() {
        let capsule = HttpRequestCapsule::new();
        let config = config(json!({"url": "https://api.example.com", "fail_on_error_status": false}));
        let variables = serde_json::Map::new();
        let inputs = HashMap::new();
        let output = capsule
            .execute(CapsuleContext {
                node_id: "fetch",
                config: &config,
                inputs: &inputs,
                variables: &variables,
                services: &StatusServices(404),
            })
            .await
            .unwrap();
        assert_eq!(output.to_json()["response"]["status"], 404);
        assert_eq!(output.to_json()["body"], "nope");
    }
}
