//! Prompt rendering, response recovery, retries and the chain orchestrator.

pub mod cancel;
pub mod chain;
pub mod classify;
pub mod json;
pub mod parse;
pub mod prompt;
pub mod repair;
pub mod retry;

pub use cancel::CancellationToken;
pub use chain::{Chain, Outcome};
pub use classify::{ErrorClass, ErrorClassifier, TerminalMatch, TerminalSignature};
pub use json::{CandidateOrigin, ExtractionCandidate, extract_json};
pub use parse::{parse_structured, try_parse};
pub use prompt::{PromptTemplate, PromptVars, extract_variables, format_instructions};
pub use repair::repair_json;
pub use retry::RetryPolicy;
