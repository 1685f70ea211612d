//! JSON extraction from LLM responses.
//!
//! LLM providers often return JSON wrapped in markdown code blocks or
//! surrounded by conversational text. This module isolates the JSON payload,
//! handling nested brackets and string escaping correctly.

use std::fmt;

const FENCE: &str = "```";

/// Where an extraction candidate was found. Used for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOrigin {
    MarkdownFenced,
    BracketScanned,
}

impl CandidateOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateOrigin::MarkdownFenced => "markdown-fenced",
            CandidateOrigin::BracketScanned => "bracket-scanned",
        }
    }
}

impl fmt::Display for CandidateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A substring of a raw response believed to contain JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionCandidate {
    pub text: String,
    pub origin: CandidateOrigin,
}

/// Extract a JSON payload from an LLM response that may contain extra text.
///
/// Tries, in order:
/// 1. A ` ```json ` fenced block (tag matched case-insensitively)
/// 2. Any fenced block
/// 3. The first `{` or `[` and its structurally matching closer
///
/// Fenced content only qualifies when it starts with `{` or `[`.
pub fn extract_json(response: &str) -> Option<ExtractionCandidate> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(text) = find_fenced_json(trimmed, true).or_else(|| find_fenced_json(trimmed, false)) {
        return Some(ExtractionCandidate {
            text,
            origin: CandidateOrigin::MarkdownFenced,
        });
    }

    extract_balanced(trimmed).map(|text| ExtractionCandidate {
        text: text.to_string(),
        origin: CandidateOrigin::BracketScanned,
    })
}

/// Scan fenced code blocks and return the first whose body looks like JSON.
///
/// With `json_tag`, only blocks opened by ` ```json ` are considered.
fn find_fenced_json(text: &str, json_tag: bool) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    let opener = if json_tag { "```json" } else { FENCE };

    let mut search_from = 0;
    while let Some(rel_start) = lower[search_from..].find(opener) {
        let body_start = search_from + rel_start + opener.len();
        let rel_end = text[body_start..].find(FENCE)?;
        let body_end = body_start + rel_end;

        let body = text[body_start..body_end].trim();
        if looks_like_json(body) {
            return Some(body.to_string());
        }

        // A generic fence may carry an info string such as "JSON" or "js".
        if !json_tag
            && let Some((tag, rest)) = body.split_once('\n')
            && is_info_string(tag)
        {
            let rest = rest.trim();
            if looks_like_json(rest) {
                return Some(rest.to_string());
            }
        }

        search_from = body_end + FENCE.len();
    }

    None
}

fn looks_like_json(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[')
}

fn is_info_string(tag: &str) -> bool {
    let tag = tag.trim();
    !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Find the first `{` or `[` and return the region up to its matching closer.
///
/// Tracks bracket depth while respecting JSON string literals (including
/// escaped characters), so `{"msg": "use { and } carefully"}` is handled
/// correctly. Returns `None` when the region never balances.
fn extract_balanced(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let candidate = &text[start..];

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (idx, ch) in candidate.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&candidate[..=idx]);
                }
            }
            _ => {}
        }
    }

    None
}
