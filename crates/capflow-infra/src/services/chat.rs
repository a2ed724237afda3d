//! Wire types for OpenAI-compatible `/chat/completions`.
//!
//! Only the fields capsules use are modelled; unknown response fields are
//! ignored.

use capflow_core::capsule::services::{LlmPrompt, ServiceError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

impl ChatRequest {
    /// Build a single-turn request; the prompt's model overrides `default_model`.
    pub fn from_prompt(prompt: LlmPrompt, default_model: &str) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = prompt.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(prompt.prompt),
        });

        Self {
            model: prompt.model.unwrap_or_else(|| default_model.to_string()),
            messages,
            temperature: prompt.temperature,
            max_tokens: prompt.max_tokens,
        }
    }
}

impl ChatResponse {
    /// Text of the first choice.
    pub fn into_text(self) -> Result<String, ServiceError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ServiceError::InvalidResponse("completion has no message content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_includes_system_and_overrides() {
        let request = ChatRequest::from_prompt(
            LlmPrompt {
                system: Some("Be brief.".to_string()),
                prompt: "Summarize the incident log".to_string(),
                model: None,
                temperature: Some(0.2),
                max_tokens: None,
            },
            "gpt-4o-mini",
        );
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Summarize the incident log");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn response_first_choice_text() {
        let response: ChatResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "All clear."}}],
            "usage": {"total_tokens": 12}
        }))
        .unwrap();
        assert_eq!(response.into_text().unwrap(), "All clear.");

        let empty: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(empty.into_text(), Err(ServiceError::InvalidResponse(_))));
    }
}
