//! Heuristic repair of malformed JSON produced by LLMs.
//!
//! Every pass is a pure string transformation that never fails. Passes that
//! rewrite syntax only touch text outside existing double-quoted strings, so
//! valid JSON comes back unchanged and repairing twice equals repairing once.

use std::sync::LazyLock;

use regex_lite::Regex;

const INVISIBLE_CHARS: &[char] = &['\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}'];

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*,(\s*[}\]])").expect("Invalid regex"));
static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([{,]\s*)(\w+)(\s*):").expect("Invalid regex"));
static PY_TRUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bTrue\b").expect("Invalid regex"));
static PY_FALSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bFalse\b").expect("Invalid regex"));
static PY_NONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bNone\b").expect("Invalid regex"));

/// Repair common LLM JSON mistakes.
///
/// Passes, in order:
/// 1. Strip byte-order marks and zero-width characters
/// 2. Convert single-quoted keys/values to double-quoted strings
/// 3. Remove trailing commas before `]` or `}`
/// 4. Quote bare object keys
/// 5. Normalize Python literals `True`/`False`/`None`
/// 6. Escape raw newlines inside string literals
pub fn repair_json(candidate: &str) -> String {
    if candidate.is_empty() {
        return String::new();
    }

    let mut result = strip_invisible(candidate);
    result = convert_single_quotes(&result);
    result = map_outside_strings(&result, remove_trailing_commas);
    result = map_outside_strings(&result, |s| BARE_KEY.replace_all(s, r#"${1}"${2}"${3}:"#).into_owned());
    result = map_outside_strings(&result, normalize_python_literals);
    escape_control_chars_in_strings(&result)
}

fn strip_invisible(text: &str) -> String {
    text.trim_matches(INVISIBLE_CHARS).to_string()
}

/// Remove trailing commas until none are left (handles `[1,,]`).
fn remove_trailing_commas(segment: &str) -> String {
    let mut current = segment.to_string();
    loop {
        let next = TRAILING_COMMA.replace_all(&current, "${1}").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn normalize_python_literals(segment: &str) -> String {
    let s = PY_TRUE.replace_all(segment, "true");
    let s = PY_FALSE.replace_all(&s, "false");
    PY_NONE.replace_all(&s, "null").into_owned()
}

/// Apply `f` to every region of `text` that lies outside double-quoted strings.
fn map_outside_strings<F>(text: &str, f: F) -> String
where
    F: Fn(&str) -> String,
{
    let mut out = String::with_capacity(text.len());
    let mut outside = String::new();
    let mut inside = String::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if in_string {
            inside.push(ch);
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
                out.push_str(&inside);
                inside.clear();
            }
        } else if ch == '"' {
            out.push_str(&f(&outside));
            outside.clear();
            in_string = true;
            inside.push(ch);
        } else {
            outside.push(ch);
        }
    }

    // An unterminated string is kept verbatim.
    out.push_str(&f(&outside));
    out.push_str(&inside);
    out
}

/// Convert `'token'` to `"token"` where it sits in key or value position.
///
/// A token qualifies when the previous significant character is one of
/// `{ , : [` and the next one after the closing quote is one of `} , : ]`.
fn convert_single_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut last_significant: Option<char> = None;
    let mut in_string = false;
    let mut escape_next = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if in_string {
            out.push(ch);
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == '"' {
                in_string = false;
                last_significant = Some('"');
            }
            i += 1;
            continue;
        }

        if ch == '\'' && matches!(last_significant, Some('{' | ',' | ':' | '[')) {
            if let Some(close) = chars[i + 1..].iter().position(|&c| c == '\'').map(|p| i + 1 + p) {
                let follows = chars[close + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(follows, Some('}' | ',' | ':' | ']')) {
                    out.push('"');
                    for &inner in &chars[i + 1..close] {
                        if inner == '"' {
                            out.push('\\');
                        }
                        out.push(inner);
                    }
                    out.push('"');
                    last_significant = Some('"');
                    i = close + 1;
                    continue;
                }
            }
        }

        if ch == '"' {
            in_string = true;
        }
        if !ch.is_whitespace() {
            last_significant = Some(ch);
        }
        out.push(ch);
        i += 1;
    }

    out
}

/// Escape raw newlines, carriage returns and tabs inside string literals.
fn escape_control_chars_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if !in_string {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
            continue;
        }

        if escape_next {
            escape_next = false;
            out.push(ch);
            continue;
        }

        match ch {
            '\\' => {
                escape_next = true;
                out.push(ch);
            }
            '"' => {
                in_string = false;
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn repaired_value(input: &str) -> Value {
        let repaired = repair_json(input);
        serde_json::from_str(&repaired)
            .unwrap_or_else(|e| panic!("repaired JSON did not parse: {} ({})", repaired, e))
    }

    #[test]
    fn test_valid_json_unchanged() {
        let inputs = [
            r#"{"a": 1, "b": [true, false, null]}"#,
            r#"{"text": "it's, 'quoted': fine", "n": "None True"}"#,
            r#"[{"k": "a, }"}, {"k": "{x: 1}"}]"#,
            "{\"escaped\": \"line\\nbreak\"}",
        ];
        for input in inputs {
            assert_eq!(repair_json(input), input);
        }
    }

    #[test]
    fn test_strips_bom_and_zero_width() {
        assert_eq!(repaired_value("\u{feff}{\"a\": 1}\u{200b}"), json!({"a": 1}));
    }

    #[test]
    fn test_single_quotes_converted() {
        assert_eq!(
            repaired_value("{'label': 'Beach Sunset'}"),
            json!({"label": "Beach Sunset"})
        );
    }

    #[test]
    fn test_single_quotes_in_arrays() {
        assert_eq!(repaired_value("['a', 'b']"), json!(["a", "b"]));
    }

    #[test]
    fn test_single_quoted_value_with_double_quote_inside() {
        assert_eq!(
            repaired_value(r#"{'quote': 'say "hi"'}"#),
            json!({"quote": "say \"hi\""})
        );
    }

    #[test]
    fn test_apostrophe_inside_double_quoted_string_untouched() {
        let input = r#"{"a": "don't", 'b': 'ok'}"#;
        assert_eq!(repaired_value(input), json!({"a": "don't", "b": "ok"}));
    }

    #[test]
    fn test_trailing_commas_removed() {
        assert_eq!(
            repaired_value(r#"{"a": [1, 2, ], "b": {"c": 3,},}"#),
            json!({"a": [1, 2], "b": {"c": 3}})
        );
    }

    #[test]
    fn test_repeated_trailing_commas_removed() {
        assert_eq!(repaired_value("[1,,]"), json!([1]));
    }

    #[test]
    fn test_bare_keys_quoted() {
        assert_eq!(
            repaired_value(r#"{topic_id: 3, label: "Snorkel Tours"}"#),
            json!({"topic_id": 3, "label": "Snorkel Tours"})
        );
    }

    #[test]
    fn test_python_literals_normalized() {
        assert_eq!(
            repaired_value(r#"{"a": True, "b": False, "c": None}"#),
            json!({"a": true, "b": false, "c": null})
        );
    }

    #[test]
    fn test_raw_newlines_in_strings_escaped() {
        assert_eq!(
            repaired_value("{\"summary\": \"line one\nline two\"}"),
            json!({"summary": "line one\nline two"})
        );
    }

    #[test]
    fn test_newlines_between_tokens_kept() {
        let input = "{\n  \"a\": 1\n}";
        assert_eq!(repair_json(input), input);
    }

    #[test]
    fn test_combined_python_dict() {
        let input = "{'topics': [{'topic_id': 0, 'label': 'Cenotes', 'primary': True},], 'extra': None}";
        assert_eq!(
            repaired_value(input),
            json!({"topics": [{"topic_id": 0, "label": "Cenotes", "primary": true}], "extra": null})
        );
    }

    #[test]
    fn test_repair_is_idempotent() {
        let inputs = [
            "{'label': 'Beach Sunset'}",
            "{a: 1, b: [1, 2,],}",
            "{\"x\": \"multi\nline\", 'y': None}",
            "\u{feff}[True, False,,]",
            "{'unterminated: 1",
            "not json at all",
            "{\"a\": \"tab\there\"}",
            "{ key : 'value' , other: 'it's' }",
        ];
        for input in inputs {
            let once = repair_json(input);
            assert_eq!(repair_json(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(repair_json(""), "");
    }
}
