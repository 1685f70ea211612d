//! Backend selection and configuration loaded from the environment.
//!
//! Mirrors how the rest of the toolchain is configured: plain environment
//! variables, with invalid numeric values logged and replaced by defaults.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::error::ConfigError;

const DEFAULT_MODE: &str = "local";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_NUM_CTX: u32 = 16_384;
const DEFAULT_TEMPERATURE: f32 = 0.0;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub const MODE_ENV_VAR: &str = "LLM_MODE";
pub const OPENAI_API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";
pub const OPENAI_MODEL_ENV_VAR: &str = "OPENAI_MODEL";
pub const OPENAI_BASE_URL_ENV_VAR: &str = "OPENAI_BASE_URL";
pub const OLLAMA_BASE_URL_ENV_VAR: &str = "OLLAMA_BASE_URL";
pub const OLLAMA_MODEL_ENV_VAR: &str = "OLLAMA_MODEL";
pub const OLLAMA_NUM_CTX_ENV_VAR: &str = "OLLAMA_NUM_CTX";
pub const TEMPERATURE_ENV_VAR: &str = "LLM_TEMPERATURE";
pub const TIMEOUT_ENV_VAR: &str = "LLM_TIMEOUT_SECS";

/// Which backend family is active for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    /// Remote OpenAI-compatible API.
    Api,
    /// Local Ollama service.
    Local,
    /// No backend; every invocation fails with a configuration error.
    None,
}

impl LlmMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmMode::Api => "api",
            LlmMode::Local => "local",
            LlmMode::None => "none",
        }
    }
}

impl FromStr for LlmMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "api" => Ok(LlmMode::Api),
            "local" => Ok(LlmMode::Local),
            "none" => Ok(LlmMode::None),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for LlmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete backend providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Ollama,
    /// A caller-supplied backend (tests, new integrations).
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Ollama => "Ollama",
            Provider::Custom => "Custom backend",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for the remote OpenAI-compatible backend.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
        }
    }
}

/// Settings for the local Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    /// No fallback model: an empty value means setup never finished.
    pub model: String,
    pub num_ctx: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            model: String::new(),
            num_ctx: DEFAULT_NUM_CTX,
        }
    }
}

/// Full backend configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub mode: LlmMode,
    pub openai: OpenAiConfig,
    pub ollama: OllamaConfig,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            mode: LlmMode::Local,
            openai: OpenAiConfig::default(),
            ollama: OllamaConfig::default(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl LlmConfig {
    /// Build a configuration from environment variables.
    ///
    /// Fails only on an unrecognized `LLM_MODE`. Prerequisites such as the
    /// API key are checked later by [`LlmConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = env_non_empty(MODE_ENV_VAR)
            .unwrap_or_else(|| DEFAULT_MODE.to_string())
            .parse::<LlmMode>()?;

        let openai = OpenAiConfig {
            api_key: env_non_empty(OPENAI_API_KEY_ENV_VAR),
            model: env_non_empty(OPENAI_MODEL_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: env_non_empty(OPENAI_BASE_URL_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        };

        let ollama = OllamaConfig {
            base_url: env_non_empty(OLLAMA_BASE_URL_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
            model: env_non_empty(OLLAMA_MODEL_ENV_VAR).unwrap_or_default(),
            num_ctx: env_parsed(OLLAMA_NUM_CTX_ENV_VAR, DEFAULT_NUM_CTX),
        };

        Ok(Self {
            mode,
            openai,
            ollama,
            temperature: env_parsed(TEMPERATURE_ENV_VAR, DEFAULT_TEMPERATURE),
            timeout: Duration::from_secs(env_parsed(TIMEOUT_ENV_VAR, DEFAULT_TIMEOUT_SECS)),
        })
    }

    /// Check the prerequisites of the selected mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            LlmMode::Api => {
                if self.openai.api_key.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigError::MissingApiKey);
                }
            }
            LlmMode::Local => {
                if self.ollama.model.trim().is_empty() {
                    return Err(ConfigError::MissingModel);
                }
            }
            LlmMode::None => {}
        }
        Ok(())
    }

    /// Summary of the active configuration, safe to print or log.
    pub fn info(&self) -> ConfigInfo {
        match self.mode {
            LlmMode::Api => ConfigInfo {
                mode: self.mode,
                temperature: self.temperature,
                model: self.openai.model.clone(),
                api_key_configured: Some(self.openai.api_key.as_deref().is_some_and(|k| !k.is_empty())),
                base_url: Some(self.openai.base_url.clone()),
                note: None,
            },
            LlmMode::Local => ConfigInfo {
                mode: self.mode,
                temperature: self.temperature,
                model: self.ollama.model.clone(),
                api_key_configured: None,
                base_url: Some(self.ollama.base_url.clone()),
                note: None,
            },
            LlmMode::None => ConfigInfo {
                mode: self.mode,
                temperature: self.temperature,
                model: "none".to_string(),
                api_key_configured: None,
                base_url: None,
                note: Some("No LLM backend; LLM-dependent analysis is unavailable".to_string()),
            },
        }
    }
}

/// Serializable description of the active configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigInfo {
    pub mode: LlmMode,
    pub temperature: f32,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_configured: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

/// Read a numeric variable, warning and falling back on invalid values.
fn env_parsed<T>(var: &str, default: T) -> T
where
    T: FromStr + fmt::Display + Copy,
{
    match env_non_empty(var) {
        Some(v) => match v.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Invalid {} value '{}', using default {}", var, v, default);
                default
            }
        },
        None => default,
    }
}
