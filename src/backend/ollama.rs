//! Local Ollama chat backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::{OllamaConfig, Provider};
use crate::error::{BackendError, ConfigError, TerminalKind};
use crate::llm::classify::TerminalSignature;

use super::{LlmBackend, http_error};

/// Steps appended to a failed liveness probe.
pub const SETUP_STEPS: &str = "To use the local backend:\n  \
    1. Install Ollama from https://ollama.com\n  \
    2. Start the server with `ollama serve`\n  \
    3. Pull the model with `ollama pull <model>` and set OLLAMA_MODEL\n  \
    4. Check that OLLAMA_BASE_URL points at the running server";

pub const AUTH_HINT: &str =
    "The Ollama server rejected the request. Check OLLAMA_BASE_URL and any proxy in front of it.";

/// Non-retryable failures of an Ollama server.
pub fn terminal_signatures() -> Vec<TerminalSignature> {
    vec![
        TerminalSignature::new(TerminalKind::AuthenticationFailed, AUTH_HINT).with_status(401),
        TerminalSignature::new(TerminalKind::AuthenticationFailed, AUTH_HINT).with_status(403),
    ]
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

pub struct OllamaBackend {
    http: Client,
    model: String,
    base_url: String,
    num_ctx: u32,
    temperature: f32,
}

impl OllamaBackend {
    pub fn new(config: &OllamaConfig, temperature: f32, timeout: Duration) -> Result<Self, ConfigError> {
        if config.model.trim().is_empty() {
            return Err(ConfigError::MissingModel);
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ConfigError::ClientBuild {
                provider: Provider::Ollama,
                source,
            })?;

        Ok(Self {
            http,
            model: config.model.trim().to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            num_ctx: config.num_ctx,
            temperature,
        })
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn terminal_signatures(&self) -> Vec<TerminalSignature> {
        terminal_signatures()
    }

    async fn send(&self, prompt: &str) -> Result<String, BackendError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt },
            ],
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_ctx": self.num_ctx,
            }
        });

        debug!("POST {} (model {})", url, self.model);
        let response = self.http.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let envelope: ChatResponse = response.json().await?;
        envelope
            .message
            .map(|message| message.content)
            .ok_or_else(|| BackendError::InvalidResponse("response contained no message".to_string()))
    }
}
