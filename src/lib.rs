//! llm-chain - Robust LLM invocation with structured-output recovery.
//!
//! # Overview
//!
//! llm-chain calls a remote (OpenAI-compatible) or local (Ollama) language
//! model, pulls JSON out of noisy replies, repairs common mistakes, validates
//! the result against a target type, and retries transient failures with
//! exponential backoff. Quota and authentication failures stop immediately.

pub mod backend;
pub mod config;
pub mod error;
pub mod llm;

// Re-export commonly used types
pub use backend::{BackendHandle, LlmBackend};
pub use config::{LlmConfig, LlmMode, Provider};
pub use error::{BackendError, ConfigError, LlmError, PromptError, TerminalKind, TransientError};
pub use llm::{CancellationToken, Chain, Outcome, PromptTemplate, PromptVars, RetryPolicy};
