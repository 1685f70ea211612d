//! Shared test utilities for integration tests.
//!
//! Not all functions are used by every test file, but they're shared across tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use llm_chain::config::Provider;
use llm_chain::llm::{PromptVars, TerminalSignature};
use llm_chain::{BackendError, LlmBackend};

/// Get the path to test fixtures directory.
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Get the path to a response fixture.
pub fn response_fixture(name: &str) -> PathBuf {
    fixtures_dir().join("responses").join(name)
}

/// Read a fixture file as a string.
pub fn read_fixture(path: PathBuf) -> String {
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {:?}: {}", path, e))
}

/// Build template variables from string pairs.
pub fn vars(pairs: &[(&str, &str)]) -> PromptVars {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Test backend that replays a fixed script of replies.
///
/// Once the script runs out, `fallback` is returned for every further call.
pub struct ScriptedBackend {
    provider: Provider,
    replies: Mutex<VecDeque<Result<String, BackendError>>>,
    fallback: Result<String, BackendError>,
    signatures: Vec<TerminalSignature>,
    call_count: Arc<AtomicU32>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<String, BackendError>>) -> Self {
        Self {
            provider: Provider::Custom,
            replies: Mutex::new(replies.into()),
            fallback: Ok(String::new()),
            signatures: Vec::new(),
            call_count: Arc::new(AtomicU32::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A backend that answers every call with `reply`.
    pub fn always(reply: Result<String, BackendError>) -> Self {
        Self::new(Vec::new()).with_fallback(reply)
    }

    pub fn with_fallback(mut self, reply: Result<String, BackendError>) -> Self {
        self.fallback = reply;
        self
    }

    pub fn with_provider(mut self, provider: Provider, signatures: Vec<TerminalSignature>) -> Self {
        self.provider = provider;
        self.signatures = signatures;
        self
    }

    /// Shared counter of `send` calls, readable after the backend is moved.
    pub fn call_counter(&self) -> Arc<AtomicU32> {
        self.call_count.clone()
    }

    /// Shared log of every prompt received.
    pub fn prompt_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn model(&self) -> String {
        "scripted".to_string()
    }

    fn terminal_signatures(&self) -> Vec<TerminalSignature> {
        self.signatures.clone()
    }

    async fn send(&self, prompt: &str) -> Result<String, BackendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Number of calls recorded by a counter.
pub fn calls(counter: &Arc<AtomicU32>) -> u32 {
    counter.load(Ordering::SeqCst)
}
