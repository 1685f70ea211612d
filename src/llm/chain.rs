//! Robust invocation: render once, then attempt/parse/retry until a value,
//! a terminal failure, or exhaustion.

use std::sync::Arc;

use backoff::backoff::Backoff;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::backend::{BackendHandle, LlmBackend};
use crate::error::{
    BackendError, LlmError, MAX_RESPONSE_SNIPPET, PromptError, TerminalKind, TransientError, truncate_chars,
};

use super::cancel::CancellationToken;
use super::classify::ErrorClass;
use super::parse::{default_value, try_parse};
use super::prompt::{FORMAT_INSTRUCTIONS_VAR, PromptTemplate, PromptVars, format_instructions};
use super::retry::RetryPolicy;

/// Characters of an attempt error kept in the per-attempt warning.
const MAX_LOGGED_ERROR: usize = 100;

/// A successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The backend produced a value that passed validation.
    Success(T),
    /// Every attempt failed; the caller's default was used.
    Recovered(T),
}

impl<T> Outcome<T> {
    pub fn value(&self) -> &T {
        match self {
            Outcome::Success(value) | Outcome::Recovered(value) => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Outcome::Success(value) | Outcome::Recovered(value) => value,
        }
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self, Outcome::Recovered(_))
    }
}

/// Result of a single attempt.
enum AttemptOutcome<T> {
    Success(T),
    Transient {
        error: TransientError,
        response: Option<String>,
    },
    Terminal {
        kind: TerminalKind,
        hint: String,
        source: BackendError,
    },
}

/// One orchestrator for every flavor of chain.
///
/// - [`Chain::new`]: a single attempt
/// - [`Chain::robust`]: the default retry policy
/// - [`Chain::invoke_text`] returns raw text, [`Chain::invoke`] a validated `T`
#[derive(Debug, Clone)]
pub struct Chain {
    handle: BackendHandle,
    template: PromptTemplate,
    policy: RetryPolicy,
}

impl Chain {
    pub fn new(handle: BackendHandle, template: PromptTemplate) -> Self {
        Self {
            handle,
            template,
            policy: RetryPolicy::single_attempt(),
        }
    }

    pub fn robust(handle: BackendHandle, template: PromptTemplate) -> Self {
        Self {
            handle,
            template,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Invoke and return the raw response text.
    ///
    /// Only empty responses count as failures.
    pub async fn invoke_text(&self, vars: &PromptVars) -> Result<String, LlmError> {
        self.text_inner(vars, None).await
    }

    pub async fn invoke_text_with_cancel(
        &self,
        vars: &PromptVars,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        self.text_inner(vars, Some(cancel)).await
    }

    /// Invoke and parse the response into `T`.
    ///
    /// When every attempt fails and `default` fits `T`, returns
    /// [`Outcome::Recovered`] instead of an error.
    pub async fn invoke<T>(&self, vars: &PromptVars, default: Option<&Value>) -> Result<Outcome<T>, LlmError>
    where
        T: DeserializeOwned + JsonSchema + Send,
    {
        self.structured_inner(vars, default, None).await
    }

    /// Like [`Chain::invoke`], stopping early once `cancel` fires.
    ///
    /// Cancellation wins over the default.
    pub async fn invoke_with_cancel<T>(
        &self,
        vars: &PromptVars,
        default: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Outcome<T>, LlmError>
    where
        T: DeserializeOwned + JsonSchema + Send,
    {
        self.structured_inner(vars, default, Some(cancel)).await
    }

    async fn text_inner(&self, vars: &PromptVars, cancel: Option<&CancellationToken>) -> Result<String, LlmError> {
        let backend = self.handle.backend()?;
        let prompt = self.template.render(vars)?;
        self.run_attempts(backend, &prompt, |raw: &str| Some(raw.to_string()), cancel)
            .await
    }

    async fn structured_inner<T>(
        &self,
        vars: &PromptVars,
        default: Option<&Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Outcome<T>, LlmError>
    where
        T: DeserializeOwned + JsonSchema + Send,
    {
        let backend = self.handle.backend()?;
        let prompt = self.render_structured::<T>(vars)?;

        match self.run_attempts(backend, &prompt, try_parse::<T>, cancel).await {
            Ok(value) => Ok(Outcome::Success(value)),
            Err(LlmError::RetriesExhausted {
                attempts,
                last_error,
                last_response,
            }) => match default.and_then(default_value::<T>) {
                Some(value) => {
                    warn!(
                        "All {} attempt(s) failed, using default value. Last error: {}",
                        attempts, last_error
                    );
                    Ok(Outcome::Recovered(value))
                }
                None => Err(LlmError::RetriesExhausted {
                    attempts,
                    last_error,
                    last_response,
                }),
            },
            Err(e) => Err(e),
        }
    }

    /// Render, binding `{format_instructions}` for `T` unless the caller did.
    fn render_structured<T: JsonSchema>(&self, vars: &PromptVars) -> Result<String, PromptError> {
        let needs_instructions = self.template.has_variable(FORMAT_INSTRUCTIONS_VAR)
            && !vars.contains_key(FORMAT_INSTRUCTIONS_VAR)
            && !self.template.is_bound(FORMAT_INSTRUCTIONS_VAR);

        if !needs_instructions {
            return self.template.render(vars);
        }

        let mut vars = vars.clone();
        vars.insert(FORMAT_INSTRUCTIONS_VAR.to_string(), format_instructions::<T>()?);
        self.template.render(&vars)
    }

    async fn run_attempts<T, F>(
        &self,
        backend: &Arc<dyn LlmBackend>,
        prompt: &str,
        parse: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, LlmError>
    where
        F: Fn(&str) -> Option<T> + Sync,
        T: Send,
    {
        let total = self.policy.total_attempts();
        let mut backoff = self.policy.backoff();
        let mut attempts = 0;

        let (last_error, last_response) = loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(LlmError::Cancelled { attempts });
            }

            attempts += 1;
            let (error, response) = match self.attempt(&**backend, prompt, &parse).await {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::Terminal { kind, hint, source } => {
                    let provider = backend.provider();
                    error!("{} {}: {} ({})", provider, kind, hint, source);
                    return Err(LlmError::Terminal {
                        provider,
                        kind,
                        hint,
                        source,
                    });
                }
                AttemptOutcome::Transient { error, response } => (error, response),
            };

            warn!(
                "Attempt {}/{} failed: {}",
                attempts,
                total,
                truncate_chars(&error.to_string(), MAX_LOGGED_ERROR)
            );

            let Some(delay) = backoff.next_backoff() else {
                break (error, response);
            };

            debug!("Retrying in {:?}", delay);
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = token.cancelled() => return Err(LlmError::Cancelled { attempts }),
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        };

        Err(LlmError::RetriesExhausted {
            attempts,
            last_error,
            last_response: last_response.map(|r| truncate_chars(&r, MAX_RESPONSE_SNIPPET)),
        })
    }

    async fn attempt<T, F>(&self, backend: &dyn LlmBackend, prompt: &str, parse: &F) -> AttemptOutcome<T>
    where
        F: Fn(&str) -> Option<T> + Sync,
    {
        let response = match backend.send(prompt).await {
            Ok(response) => response,
            Err(err) => {
                return match self.handle.classifier().classify(&err) {
                    ErrorClass::Terminal(m) => AttemptOutcome::Terminal {
                        kind: m.kind,
                        hint: m.hint,
                        source: err,
                    },
                    ErrorClass::Transient => AttemptOutcome::Transient {
                        error: TransientError::Backend(err),
                        response: None,
                    },
                };
            }
        };

        if response.trim().is_empty() {
            return AttemptOutcome::Transient {
                error: TransientError::EmptyResponse,
                response: None,
            };
        }

        match parse(&response) {
            Some(value) => AttemptOutcome::Success(value),
            None => AttemptOutcome::Transient {
                error: TransientError::Unparseable,
                response: Some(response),
            },
        }
    }
}

impl BackendHandle {
    /// One-call entry point: render `template`, invoke with retries, parse into `T`.
    ///
    /// `policy` defaults to [`RetryPolicy::default`].
    pub async fn invoke<T>(
        &self,
        template: &PromptTemplate,
        vars: &PromptVars,
        default: Option<&Value>,
        policy: Option<RetryPolicy>,
    ) -> Result<Outcome<T>, LlmError>
    where
        T: DeserializeOwned + JsonSchema + Send,
    {
        Chain::new(self.clone(), template.clone())
            .with_retry_policy(policy.unwrap_or_default())
            .invoke(vars, default)
            .await
    }
}
