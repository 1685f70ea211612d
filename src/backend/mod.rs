//! Backend clients and the shared handle used by every chain.

pub mod ollama;
pub mod openai;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{LlmConfig, LlmMode, Provider};
use crate::error::{BackendError, ConfigError};
use crate::llm::classify::{ErrorClass, ErrorClassifier, TerminalSignature};

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// Prompt sent once at initialization to prove the backend answers.
pub const PROBE_PROMPT: &str = "Respond only with OK";

/// A language model reachable as `text -> text`.
///
/// This abstraction allows mocking the HTTP backends in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> String;

    /// Failures of this backend that retrying cannot fix.
    fn terminal_signatures(&self) -> Vec<TerminalSignature>;

    /// One round trip. Never retries.
    async fn send(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Shared, cloneable access to the active backend.
///
/// Built once at startup. The backend cannot be swapped in place; use
/// [`BackendHandle::reinitialize`] to get a new handle.
#[derive(Clone)]
pub struct BackendHandle {
    backend: Option<Arc<dyn LlmBackend>>,
    classifier: ErrorClassifier,
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("provider", &self.provider())
            .field("signatures", &self.classifier.signatures().len())
            .finish()
    }
}

impl BackendHandle {
    /// A handle with no backend. Every invocation fails with [`ConfigError::NoBackend`].
    pub fn disabled() -> Self {
        Self {
            backend: None,
            classifier: ErrorClassifier::default(),
        }
    }

    /// Wrap a backend without probing it.
    pub fn with_backend(backend: impl LlmBackend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    fn from_arc(backend: Arc<dyn LlmBackend>) -> Self {
        let classifier = ErrorClassifier::new(backend.terminal_signatures());
        Self {
            backend: Some(backend),
            classifier,
        }
    }

    /// Wrap a backend and run the liveness probe.
    pub async fn connect(backend: impl LlmBackend + 'static) -> Result<Self, ConfigError> {
        let handle = Self::with_backend(backend);
        handle.probe().await?;
        Ok(handle)
    }

    /// Validate `config`, build the selected backend, and probe it.
    pub async fn initialize(config: &LlmConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let backend: Arc<dyn LlmBackend> = match config.mode {
            LlmMode::None => {
                info!("LLM mode 'none': LLM-dependent features are disabled");
                return Ok(Self::disabled());
            }
            LlmMode::Api => Arc::new(OpenAiBackend::new(&config.openai, config.temperature, config.timeout)?),
            LlmMode::Local => Arc::new(OllamaBackend::new(&config.ollama, config.temperature, config.timeout)?),
        };

        let handle = Self::from_arc(backend);
        handle.probe().await?;
        info!(
            "LLM backend initialized: {} (model {}, temperature {})",
            handle.provider().map(|p| p.as_str()).unwrap_or("none"),
            handle.model().unwrap_or_default(),
            config.temperature
        );
        Ok(handle)
    }

    /// Replace this handle with one built from `config`.
    pub async fn reinitialize(self, config: &LlmConfig) -> Result<Self, ConfigError> {
        info!("Reinitializing LLM backend in mode '{}'", config.mode);
        drop(self);
        Self::initialize(config).await
    }

    /// Register an extra terminal signature, checked after the backend's own.
    pub fn with_terminal_signature(mut self, signature: TerminalSignature) -> Self {
        self.classifier.register(signature);
        self
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn provider(&self) -> Option<Provider> {
        self.backend.as_ref().map(|b| b.provider())
    }

    pub fn model(&self) -> Option<String> {
        self.backend.as_ref().map(|b| b.model())
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub(crate) fn backend(&self) -> Result<&Arc<dyn LlmBackend>, ConfigError> {
        self.backend.as_ref().ok_or(ConfigError::NoBackend)
    }

    /// Send [`PROBE_PROMPT`] and require a non-empty answer.
    pub async fn probe(&self) -> Result<(), ConfigError> {
        let backend = self.backend()?;
        let provider = backend.provider();

        let reason = match backend.send(PROBE_PROMPT).await {
            Ok(reply) if !reply.trim().is_empty() => return Ok(()),
            Ok(_) => "empty reply to liveness probe".to_string(),
            Err(err) => match self.classifier.classify(&err) {
                ErrorClass::Terminal(m) => format!("{} ({}). {}", err, m.kind, m.hint),
                ErrorClass::Transient => err.to_string(),
            },
        };

        let reason = match provider {
            Provider::Ollama => format!("{}\n{}", reason, ollama::SETUP_STEPS),
            _ => reason,
        };

        warn!("{} liveness probe failed", provider);
        Err(ConfigError::ProbeFailed { provider, reason })
    }
}

/// Turn a non-success response into [`BackendError::Http`].
///
/// If the body fails mid-read, whatever arrived is kept and the read error
/// is appended, so marker-based signatures still see it.
pub(crate) async fn http_error(mut response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let mut received = Vec::new();
    let body = loop {
        match response.chunk().await {
            Ok(Some(chunk)) => received.extend_from_slice(&chunk),
            Ok(None) => break String::from_utf8_lossy(&received).into_owned(),
            Err(e) => {
                warn!("Failed to read {} error body: {}", status, e);
                break format!("{}<unreadable body: {}>", String::from_utf8_lossy(&received), e);
            }
        }
    };
    BackendError::Http { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TerminalKind;

    fn mock_with_reply(reply: Result<String, BackendError>) -> MockLlmBackend {
        let mut mock = MockLlmBackend::new();
        mock.expect_provider().return_const(Provider::Custom);
        mock.expect_model().return_const("mock-model".to_string());
        mock.expect_terminal_signatures().returning(|| {
            vec![TerminalSignature::new(TerminalKind::AuthenticationFailed, "fix the key").with_status(401)]
        });
        mock.expect_send().times(1).returning(move |_| reply.clone());
        mock
    }

    #[tokio::test]
    async fn test_connect_succeeds_on_ok() {
        let handle = BackendHandle::connect(mock_with_reply(Ok("OK".to_string()))).await.unwrap();
        assert!(handle.is_available());
        assert_eq!(handle.provider(), Some(Provider::Custom));
        assert_eq!(handle.model().as_deref(), Some("mock-model"));
    }

    #[tokio::test]
    async fn test_probe_rejects_empty_reply() {
        let err = BackendHandle::connect(mock_with_reply(Ok("   ".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::ProbeFailed { ref reason, .. } if reason.contains("empty reply")));
    }

    #[tokio::test]
    async fn test_probe_failure_is_configuration_error() {
        let err = BackendHandle::connect(mock_with_reply(Err(BackendError::Timeout)))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::ProbeFailed { provider: Provider::Custom, .. }));
    }

    #[tokio::test]
    async fn test_probe_terminal_failure_includes_hint() {
        let reply = Err(BackendError::Http {
            status: 401,
            body: "invalid key".to_string(),
        });
        let err = BackendHandle::connect(mock_with_reply(reply)).await.unwrap_err();
        assert!(err.to_string().contains("fix the key"));
    }

    #[tokio::test]
    async fn test_disabled_handle_probe_fails_with_no_backend() {
        let handle = BackendHandle::disabled();
        assert!(!handle.is_available());
        assert!(handle.provider().is_none());
        assert!(matches!(handle.probe().await, Err(ConfigError::NoBackend)));
    }

    #[tokio::test]
    async fn test_initialize_none_mode_is_disabled() {
        let config = LlmConfig {
            mode: LlmMode::None,
            ..Default::default()
        };
        let handle = BackendHandle::initialize(&config).await.unwrap();
        assert!(!handle.is_available());
    }

    #[tokio::test]
    async fn test_initialize_checks_prerequisites_first() {
        let config = LlmConfig {
            mode: LlmMode::Api,
            ..Default::default()
        };
        let err = BackendHandle::initialize(&config).await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn test_with_backend_collects_signatures() {
        let mut mock = MockLlmBackend::new();
        mock.expect_terminal_signatures()
            .returning(crate::backend::openai::terminal_signatures);
        let handle = BackendHandle::with_backend(mock)
            .with_terminal_signature(TerminalSignature::new(TerminalKind::QuotaExhausted, "extra").with_status(402));
        assert_eq!(handle.classifier().signatures().len(), 5);
    }
}
