//! Error types for llm-chain modules using thiserror.

use std::fmt;

use thiserror::Error;

use crate::config::Provider;

/// Maximum number of characters of a raw response kept for diagnostics.
pub const MAX_RESPONSE_SNIPPET: usize = 300;

/// Errors raised while configuring or initializing a backend.
///
/// None of these are retryable: they mean the backend was never set up
/// correctly, as opposed to "currently failing".
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "No LLM backend is configured (mode 'none'). Choose a backend by setting LLM_MODE=api or LLM_MODE=local, \
         or complete the setup so a model is available."
    )]
    NoBackend,

    #[error("Invalid LLM_MODE '{0}'. Valid values: 'api', 'local' or 'none'")]
    InvalidMode(String),

    #[error(
        "Mode 'api' selected but OPENAI_API_KEY is not set. Add your key to the environment or switch to LLM_MODE=local."
    )]
    MissingApiKey,

    #[error(
        "Mode 'local' selected but OLLAMA_MODEL is not set. Run the setup wizard or set the OLLAMA_MODEL environment variable."
    )]
    MissingModel,

    #[error("Failed to build HTTP client for {provider}: {source}")]
    ClientBuild {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} liveness probe failed: {reason}")]
    ProbeFailed { provider: Provider, reason: String },
}

/// Errors from prompt template rendering.
///
/// These are authoring defects and are reported before any backend call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("Missing value for template variable '{0}'")]
    MissingVariable(String),

    #[error("Failed to serialize output schema: {0}")]
    SchemaSerialization(String),
}

/// Errors from a single backend round trip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response envelope: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// HTTP status code, when the failure came from an HTTP response.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_connect() {
            BackendError::Unavailable(err.to_string())
        } else if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            BackendError::RequestFailed(err.to_string())
        }
    }
}

/// Non-retryable failure categories detected mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    QuotaExhausted,
    AuthenticationFailed,
}

impl TerminalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalKind::QuotaExhausted => "quota exhausted",
            TerminalKind::AuthenticationFailed => "authentication failed",
        }
    }
}

impl fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one attempt that may succeed on a later identical attempt.
///
/// Absorbed by the retry loop; only surfaces as the source of
/// [`LlmError::RetriesExhausted`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransientError {
    #[error("Backend request failed: {0}")]
    Backend(#[source] BackendError),

    #[error("Empty response from LLM")]
    EmptyResponse,

    #[error("Could not parse response into the expected schema")]
    Unparseable,
}

/// Errors surfaced to callers of the invocation layer.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("{provider} {kind}: {hint}")]
    Terminal {
        provider: Provider,
        kind: TerminalKind,
        hint: String,
        #[source]
        source: BackendError,
    },

    #[error(
        "LLM operation failed after {attempts} attempt(s). Last error: {last_error}{}",
        response_suffix(.last_response)
    )]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: TransientError,
        last_response: Option<String>,
    },

    #[error("LLM invocation cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl LlmError {
    /// True for failures that no amount of retrying can fix.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LlmError::Terminal { .. })
    }

    /// True when the backend was never usable in the first place.
    pub fn is_configuration(&self) -> bool {
        matches!(self, LlmError::Configuration(_))
    }
}

fn response_suffix(last_response: &Option<String>) -> String {
    match last_response {
        Some(response) => format!(". Last response (truncated): {response}"),
        None => String::new(),
    }
}

/// Truncate a response to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
