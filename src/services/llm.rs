use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::settings::LlmSettings;
use crate::modules::session::model::{Role, TurnInput};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Missing API key")]
    MissingApiKey,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub content: String,
    pub model: String,
    pub usage: Option<UsageInfo>,
}

/// Produces the next assistant turn for an ordered history.
#[async_trait]
pub trait ReplyProducer: Send + Sync {
    async fn reply(&self, history: &[TurnInput]) -> Result<Reply, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.settings.default_model
    }

    fn build_request<'a>(&'a self, history: &'a [TurnInput]) -> ChatRequest<'a> {
        let has_system = history.iter().any(|t| t.role == Role::System);

        let mut messages = Vec::with_capacity(history.len() + 1);
        if !has_system && !self.settings.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: Role::System.as_str(),
                content: &self.settings.system_prompt,
            });
        }
        messages.extend(history.iter().map(|t| ChatMessage {
            role: t.role.as_str(),
            content: &t.content,
        }));

        ChatRequest {
            model: &self.settings.default_model,
            messages,
            max_tokens: Some(self.settings.max_tokens),
            temperature: Some(self.settings.temperature),
        }
    }
}

#[async_trait]
impl ReplyProducer for LlmClient {
    async fn reply(&self, history: &[TurnInput]) -> Result<Reply, LlmError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(LlmError::MissingApiKey)?;

        let request = self.build_request(history);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.settings.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
                return Err(LlmError::ApiError(error_response.error.message));
            }
            return Err(LlmError::ApiError(error_text));
        }

        let chat_response: ChatResponse = response.json().await?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        let usage = chat_response.usage.map(|u| UsageInfo {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(Reply {
            content,
            model: self.settings.default_model.clone(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(api_key: Option<&str>) -> LlmSettings {
        LlmSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: api_key.map(str::to_string),
            default_model: "test-model".to_string(),
            system_prompt: "Be brief.".to_string(),
            max_tokens: 64,
            temperature: 0.2,
        }
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let client = LlmClient::new(settings(None));
        let result = client.reply(&[TurnInput::user("hi")]).await;
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    #[test]
    fn test_request_prepends_system_prompt() {
        let client = LlmClient::new(settings(Some("k")));
        let history = vec![TurnInput::user("hi"), TurnInput::assistant("hello")];

        let body = serde_json::to_value(client.build_request(&history)).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "Be brief.");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(body["model"], "test-model");
    }

    #[test]
    fn test_request_keeps_caller_system_turn() {
        let client = LlmClient::new(settings(Some("k")));
        let history = vec![TurnInput::system("Answer in German."), TurnInput::user("hi")];

        let body = serde_json::to_value(client.build_request(&history)).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], "Answer in German.");
    }
}
