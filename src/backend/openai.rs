//! Remote OpenAI-compatible chat completions backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::{OpenAiConfig, Provider};
use crate::error::{BackendError, ConfigError, TerminalKind};
use crate::llm::classify::TerminalSignature;

use super::{LlmBackend, http_error};

pub const QUOTA_HINT: &str = "Add funds at https://platform.openai.com/account/billing \
                              or switch to the local backend (LLM_MODE=local).";
pub const AUTH_HINT: &str =
    "Check that OPENAI_API_KEY is valid and active, or switch to the local backend (LLM_MODE=local).";

/// Non-retryable failures of the OpenAI API.
pub fn terminal_signatures() -> Vec<TerminalSignature> {
    vec![
        TerminalSignature::new(TerminalKind::QuotaExhausted, QUOTA_HINT)
            .with_status(429)
            .with_markers(&["exceeded your current quota"]),
        TerminalSignature::new(TerminalKind::QuotaExhausted, QUOTA_HINT).with_markers(&["insufficient_quota"]),
        TerminalSignature::new(TerminalKind::AuthenticationFailed, AUTH_HINT).with_status(401),
        TerminalSignature::new(TerminalKind::AuthenticationFailed, AUTH_HINT).with_status(403),
    ]
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiBackend {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl OpenAiBackend {
    pub fn new(config: &OpenAiConfig, temperature: f32, timeout: Duration) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ConfigError::ClientBuild {
                provider: Provider::OpenAi,
                source,
            })?;

        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature,
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn terminal_signatures(&self) -> Vec<TerminalSignature> {
        terminal_signatures()
    }

    async fn send(&self, prompt: &str) -> Result<String, BackendError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt },
            ],
            "temperature": self.temperature,
        });

        debug!("POST {} (model {})", url, self.model);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let envelope: ChatCompletionResponse = response.json().await?;
        let choice = envelope
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("response contained no choices".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }
}
