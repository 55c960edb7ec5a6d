use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::classify::parser::parse_classifications;
use crate::classify::prompts::{estimate_tokens, DefaultPromptStrategy, PromptStrategy};
use crate::classify::provider::ClassificationModel;
use crate::error::{Error, Result};
use crate::models::RawClassification;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat completions backend.
pub struct OpenAiModel {
    client: Client,
    api_key: String,
    model: String,
    prompts: Arc<dyn PromptStrategy>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiModel {
    pub fn new(api_key: String, model: Option<String>) -> Result<Self> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            prompts: Arc::new(DefaultPromptStrategy::default()),
        })
    }

    pub fn with_prompt_strategy(mut self, prompts: Arc<dyn PromptStrategy>) -> Self {
        self.prompts = prompts;
        self
    }
}

#[async_trait]
impl ClassificationModel for OpenAiModel {
    async fn classify(&self, texts: &[String], model_version: &str) -> Result<Vec<RawClassification>> {
        let prompt = self.prompts.render(texts);
        tracing::debug!("Sending ~{} tokens to OpenAI", estimate_tokens(&prompt));

        let request_body = ChatRequest {
            model: model_version.to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: self.prompts.system_prompt().to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            temperature: 0.3,
            max_tokens: 4096,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request_body)
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

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::ParseError(format!("Failed to parse OpenAI response: {}", e)))?;

        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(Error::ParseError("Empty response from OpenAI".to_string()));
        }

        parse_classifications(&text, texts.len())
    }

    fn model_version(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "OpenAI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneLine;

    impl PromptStrategy for OneLine {
        fn system_prompt(&self) -> &str {
            "Reply with JSON."
        }

        fn render(&self, texts: &[String]) -> String {
            texts.join(" | ")
        }
    }

    #[test]
    fn test_defaults_and_prompt_override() {
        let model = OpenAiModel::new("key".to_string(), None).unwrap();
        assert_eq!(model.model_version(), DEFAULT_OPENAI_MODEL);

        let model = OpenAiModel::new("key".to_string(), Some("gpt-4o".to_string()))
            .unwrap()
            .with_prompt_strategy(Arc::new(OneLine));
        assert_eq!(model.model_version(), "gpt-4o");
        assert_eq!(model.prompts.system_prompt(), "Reply with JSON.");
        assert_eq!(model.prompts.render(&["a".to_string(), "b".to_string()]), "a | b");
    }
}
