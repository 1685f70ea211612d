//! Schema-validating parser with progressive recovery.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::json::extract_json;
use super::repair::repair_json;

/// Parse raw LLM output into `T`, falling back to `default` when every tier fails.
///
/// Tiers, stopping at the first success:
/// 1. Strict JSON parse of the raw text
/// 2. Extract, repair, strict JSON parse
/// 3. Extract, repair, permissive parse (YAML flow syntax)
///
/// Returns `None` when all tiers fail and there is no default, or the
/// default does not fit `T`.
pub fn parse_structured<T>(raw: &str, default: Option<&Value>) -> Option<T>
where
    T: DeserializeOwned,
{
    try_parse(raw).or_else(|| default.and_then(default_value::<T>))
}

/// Convert a caller-supplied default into `T`, or `None` if it does not fit.
pub fn default_value<T>(default: &Value) -> Option<T>
where
    T: DeserializeOwned,
{
    match serde_json::from_value::<T>(default.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Default value does not match the expected schema: {}", e);
            None
        }
    }
}

/// Run the three parse tiers without any default.
pub fn try_parse<T>(raw: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<T>(trimmed) {
        Ok(value) => return Some(value),
        Err(e) => debug!("Strict parse failed: {}", e),
    }

    let candidate = extract_json(trimmed)?;
    debug!("Using {} candidate for recovery", candidate.origin);
    let repaired = repair_json(&candidate.text);

    match serde_json::from_str::<T>(&repaired) {
        Ok(value) => return Some(value),
        Err(e) => debug!("Parse after repair failed: {}", e),
    }

    // YAML only widens the grammar; typing stays with serde_json.
    let value = match serde_yaml::from_str::<Value>(&repaired) {
        Ok(value) => value,
        Err(e) => {
            debug!("Permissive parse failed: {}", e);
            return None;
        }
    };

    match serde_json::from_value::<T>(value) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Permissive parse does not match the expected schema: {}", e);
            None
        }
    }
}
