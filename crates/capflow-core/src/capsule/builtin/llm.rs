use capflow_types::artifact::SlotDataType;
use capflow_types::capsule::{CapsuleCategory, CapsuleTypeMeta, ConfigFieldType};
use serde_json::Value;

use super::{field, required, slot, with_help};
use crate::capsule::behavior::{Capsule, CapsuleContext, CapsuleOutput, CapsuleRunError};
use crate::capsule::services::LlmPrompt;
use crate::capsule::template::{TemplateScope, references};

/// Sends upstream content to an LLM with an analysis prompt.
pub struct LlmAnalyzerCapsule {
    meta: CapsuleTypeMeta,
}

impl LlmAnalyzerCapsule {
    pub const TYPE_KEY: &'static str = "llm-analyzer";

    pub fn new() -> Self {
        Self {
            meta: CapsuleTypeMeta {
                type_key: Self::TYPE_KEY.to_string(),
                name: "LLM Analyzer".to_string(),
                description: "Analyzes upstream content with a language model".to_string(),
                icon: "sparkles".to_string(),
                category: CapsuleCategory::Processor,
                config_schema: vec![
                    with_help(
                        required(field("prompt", "Prompt", ConfigFieldType::Textarea)),
                        "Content is appended unless the prompt references {{inputs.content}}",
                    ),
                    field("system_prompt", "System prompt", ConfigFieldType::Textarea),
                    field("model", "Model", ConfigFieldType::Text),
                    field("temperature", "Temperature", ConfigFieldType::Number),
                    field("max_tokens", "Max tokens", ConfigFieldType::Number),
                ],
                default_inputs: vec![slot("content", "Content", SlotDataType::Text, true)],
                default_outputs: vec![slot("analysis", "Analysis", SlotDataType::Text, false)],
                testable: true,
            },
        }
    }
}

impl Default for LlmAnalyzerCapsule {
    fn default() -> Self {
        Self::new()
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Capsule for LlmAnalyzerCapsule {
    fn meta(&self) -> &CapsuleTypeMeta {
        &self.meta
    }

    async fn execute(&self, ctx: CapsuleContext<'_>) -> Result<CapsuleOutput, CapsuleRunError> {
        let scope = TemplateScope {
            inputs: ctx.inputs,
            variables: ctx.variables,
        };
        let template = ctx.require_str("prompt")?;
        let content = ctx
            .input_text("content")
            .ok_or_else(|| CapsuleRunError::MissingInput("content".to_string()))?;

        let mut prompt = scope.render(template);
        if !references(template, "inputs.content") {
            prompt.push_str("\n\n");
            prompt.push_str(&content);
        }

        let request = LlmPrompt {
            system: ctx.config_str("system_prompt").map(|s| scope.render(s)),
            prompt,
            model: ctx
                .config_str("model")
                .filter(|m| !m.trim().is_empty())
                .map(str::to_string),
            temperature: number(ctx.config.get("temperature")).map(|t| t as f32),
            max_tokens: number(ctx.config.get("max_tokens")).map(|t| t as u32),
        };
        let prompt_chars = request.prompt.chars().count();

        let analysis = ctx.services.llm_complete(request).await?;
        if analysis.trim().is_empty() {
            return Err(CapsuleRunError::Failed("model returned an empty response".to_string()));
        }

        Ok(CapsuleOutput::new()
            .with_text("analysis", analysis, "text/plain")
            .log(format!(
                "prompt of {prompt_chars} chars analyzed ({} chars of content)",
                content.chars().count()
            )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::services::SimulatedServices;
    use capflow_types::artifact::ArtifactContent;
    use serde_json::json;
    use std::collections::HashMap;

    #[tokio::test]
    async fn appends_content_when_not_referenced() {
        let capsule = LlmAnalyzerCapsule::new();
        let config = json!({"prompt": "Summarize"}).as_object().cloned().unwrap();
        let inputs = HashMap::from([(
            "content".to_string(),
            ArtifactContent::Json(json!("quarterly revenue grew")),
        )]);
        let variables = serde_json::Map::new();
        let output = capsule
            .execute(CapsuleContext {
                node_id: "analyze",
                config: &config,
                inputs: &inputs,
                variables: &variables,
                services: &SimulatedServices,
            })
            .await
            .unwrap();
        let analysis = output.to_json()["analysis"].as_str().unwrap().to_string();
        assert!(analysis.starts_with("[simulated completion] Summarize"));
        assert!(analysis.contains("quarterly"));
    }

    #[tokio::test]
    async fn missing_content_is_an_error() {
        let capsule = LlmAnalyzerCapsule::new();
        let config = json!({"prompt": "Summarize"}).as_object().cloned().unwrap();
        let inputs = HashMap::new();
        let variables = serde_json::Map::new();
        let err = capsule
            .execute(CapsuleContext {
                node_id: "analyze",
                config: &config,
                inputs: &inputs,
                variables: &variables,
                services: &SimulatedServices,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CapsuleRunError::MissingInput(_)));
    }
}
