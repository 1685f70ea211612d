//! Transient vs. terminal classification of backend failures.
//!
//! Terminal failures (exhausted quota, rejected credentials) will fail the
//! same way on every retry, so the chain stops at the first one. Each backend
//! contributes signatures describing what such failures look like for it.

use crate::error::{BackendError, TerminalKind};

/// Pattern describing one kind of non-retryable backend failure.
///
/// A signature matches when the status (if set) is equal and, when markers
/// are given, at least one marker appears in the error text
/// (case-insensitive). A signature with neither never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSignature {
    pub kind: TerminalKind,
    pub status: Option<u16>,
    pub markers: Vec<String>,
    pub hint: String,
}

impl TerminalSignature {
    pub fn new(kind: TerminalKind, hint: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            markers: Vec::new(),
            hint: hint.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_markers(mut self, markers: &[&str]) -> Self {
        self.markers = markers.iter().map(|m| m.to_lowercase()).collect();
        self
    }

    pub fn matches(&self, err: &BackendError) -> bool {
        if self.status.is_none() && self.markers.is_empty() {
            return false;
        }

        if let Some(status) = self.status
            && err.status() != Some(status)
        {
            return false;
        }

        if self.markers.is_empty() {
            return true;
        }

        let text = err.to_string().to_lowercase();
        self.markers.iter().any(|marker| text.contains(marker.as_str()))
    }
}

/// Result of a terminal match: what went wrong and how to fix it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalMatch {
    pub kind: TerminalKind,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Terminal(TerminalMatch),
}

impl ErrorClass {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ErrorClass::Terminal(_))
    }
}

/// Ordered set of terminal signatures. The first match wins.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    signatures: Vec<TerminalSignature>,
}

impl ErrorClassifier {
    pub fn new(signatures: Vec<TerminalSignature>) -> Self {
        Self { signatures }
    }

    pub fn register(&mut self, signature: TerminalSignature) {
        self.signatures.push(signature);
    }

    pub fn with_signature(mut self, signature: TerminalSignature) -> Self {
        self.register(signature);
        self
    }

    pub fn signatures(&self) -> &[TerminalSignature] {
        &self.signatures
    }

    /// Anything that matches no signature is transient.
    pub fn classify(&self, err: &BackendError) -> ErrorClass {
        self.signatures
            .iter()
            .find(|signature| signature.matches(err))
            .map(|signature| {
                ErrorClass::Terminal(TerminalMatch {
                    kind: signature.kind,
                    hint: signature.hint.clone(),
                })
            })
            .unwrap_or(ErrorClass::Transient)
    }
}
