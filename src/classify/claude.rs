use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::classify::parser::parse_classifications;
use crate::classify::prompts::{estimate_tokens, DefaultPromptStrategy, PromptStrategy};
use crate::classify::provider::ClassificationModel;
use crate::error::{Error, Result};
use crate::models::RawClassification;

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic messages API backend.
pub struct ClaudeModel {
    client: Client,
    api_key: String,
    model: String,
    prompts: Arc<dyn PromptStrategy>,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [Turn<'a>; 1],
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<Block>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl MessagesResponse {
    /// Concatenated text blocks. A reply cut off at `max_tokens` cannot hold
    /// complete JSON, so it is reported as malformed.
    fn into_text(self) -> Result<String> {
        if let Some(error) = self.error {
            return Err(Error::ModelApi(error.message));
        }
        if self.stop_reason.as_deref() == Some("max_tokens") {
            return Err(Error::ParseError("Claude reply was truncated".to_string()));
        }

        let text: String = self
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();

        if text.trim().is_empty() {
            return Err(Error::ParseError("Empty response from Claude".to_string()));
        }
        Ok(text)
    }
}

impl ClaudeModel {
    pub fn new(api_key: String, model: Option<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_CLAUDE_MODEL.to_string()),
            prompts: Arc::new(DefaultPromptStrategy::default()),
        })
    }

    pub fn with_prompt_strategy(mut self, prompts: Arc<dyn PromptStrategy>) -> Self {
        self.prompts = prompts;
        self
    }
}

#[async_trait]
impl ClassificationModel for ClaudeModel {
    async fn classify(&self, texts: &[String], model_version: &str) -> Result<Vec<RawClassification>> {
        let prompt = self.prompts.render(texts);
        tracing::debug!("Sending ~{} tokens to Claude", estimate_tokens(&prompt));

        let body = MessagesRequest {
            model: model_version,
            max_tokens: 4096,
            temperature: 0.3,
            system: self.prompts.system_prompt(),
            messages: [Turn {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(super::retry_after_secs(&response)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ModelApi(Error::server_error(status, &body)));
        }

        let reply: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::ParseError(format!("Failed to parse Claude response: {}", e)))?;

        parse_classifications(&reply.into_text()?, texts.len())
    }

    fn model_version(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "Claude"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(value: serde_json::Value) -> MessagesResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_text_blocks_joined() {
        let text = reply(json!({
            "content": [
                {"type": "text", "text": "{\"results\": "},
                {"type": "tool_use"},
                {"type": "text", "text": "[]}"}
            ],
            "stop_reason": "end_turn"
        }))
        .into_text()
        .unwrap();
        assert_eq!(text, "{\"results\": []}");
    }

    #[test]
    fn test_truncated_reply_is_malformed() {
        let err = reply(json!({
            "content": [{"type": "text", "text": "{\"results\": ["}],
            "stop_reason": "max_tokens"
        }))
        .into_text()
        .unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));
    }

    #[test]
    fn test_api_error_surfaces() {
        let err = reply(json!({"error": {"message": "overloaded"}})).into_text().unwrap_err();
        assert!(matches!(err, Error::ModelApi(m) if m == "overloaded"));
    }

    struct Terse;

    impl PromptStrategy for Terse {
        fn system_prompt(&self) -> &str {
            "JSON only."
        }

        fn render(&self, texts: &[String]) -> String {
            texts.concat()
        }
    }

    #[test]
    fn test_prompt_strategy_override() {
        let model = ClaudeModel::new("key".to_string(), None)
            .unwrap()
            .with_prompt_strategy(Arc::new(Terse));
        assert_eq!(model.model_version(), DEFAULT_CLAUDE_MODEL);
        assert_eq!(model.prompts.system_prompt(), "JSON only.");
        assert_eq!(model.prompts.render(&["a".to_string(), "b".to_string()]), "ab");
    }
}
