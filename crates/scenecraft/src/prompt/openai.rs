//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{system_instruction, user_message, PromptGenerator, PromptResult, TokenUsage};
use crate::elements::GenerationRequest;
use crate::error::GenerationError;
use crate::http::describe_failure;
use crate::secrets::is_present;

const PROVIDER: &str = "openai";

#[derive(Debug, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl ChatCompletion {
    /// First completion's text and the usage counters.
    pub fn into_prompt_result(self, requested_model: &str) -> Result<PromptResult, GenerationError> {
        let prompt = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| GenerationError::invalid_response(PROVIDER, "completion has no text"))?;

        Ok(PromptResult {
            prompt,
            model: self
                .model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| requested_model.to_string()),
            usage: self.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }
}

pub struct OpenAiPromptClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiPromptClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn request_body(request: &GenerationRequest, model: &str, previous_prompt: &str) -> Value {
        json!({
            "model": model,
            "messages": [
                { "role": "system", "content": system_instruction(previous_prompt) },
                { "role": "user", "content": user_message(request) },
            ],
            "max_tokens": 200,
            "temperature": 0.8,
        })
    }
}

#[async_trait]
impl PromptGenerator for OpenAiPromptClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
        api_key: &SecretString,
        model: &str,
        previous_prompt: &str,
    ) -> Result<PromptResult, GenerationError> {
        if !is_present(api_key) {
            return Err(GenerationError::Auth { provider: PROVIDER });
        }

        info!(
            "Requesting scene prompt from {} for {} elements",
            model,
            request.len()
        );
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(&Self::request_body(request, model, previous_prompt))
            .send()
            .await
            .map_err(|e| GenerationError::Network {
                provider: PROVIDER,
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(GenerationError::upstream(
                PROVIDER,
                describe_failure(response).await,
            ));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| GenerationError::invalid_response(PROVIDER, e.to_string()))?;
        let result = completion.into_prompt_result(model)?;
        debug!("Scene prompt: {}", result.prompt);
        Ok(result)
    }
}
