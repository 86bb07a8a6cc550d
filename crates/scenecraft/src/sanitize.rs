//! Helpers for scrubbing data before it leaves the process in a trace or a log.
//!
//! Traces are shipped to a third-party backend, so every span input and
//! output goes through [`sanitize_value`] first.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Replacement for the value of any sensitive field.
pub const REDACTED: &str = "[REDACTED]";

/// Maximum length for upstream error bodies quoted in errors and logs.
pub const MAX_ERROR_BODY_LENGTH: usize = 300;

static RE_SENSITIVE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)apikey|api_key|secret|token|password|key").unwrap());

/// True when a field with this name must never be traced.
pub fn is_sensitive_key(key: &str) -> bool {
    RE_SENSITIVE_KEY.is_match(key)
}

/// Returns a copy of `value` with every sensitive field replaced by
/// [`REDACTED`], at any depth. Arrays are sanitized element-wise; all other
/// fields are left untouched.
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sanitized: Map<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    if is_sensitive_key(k) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), sanitize_value(v))
                    }
                })
                .collect();
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

/// Truncates an upstream response body for inclusion in an error message.
///
/// Cuts on a char boundary so multi-byte text never panics.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

/// Shortens inline `data:` URIs for log lines; other URLs pass through.
pub fn abbreviate_url(url: &str) -> String {
    if url.starts_with("data:") {
        let header = url.split(',').next().unwrap_or("data:");
        return format!("{},<{} bytes>", header, url.len());
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_top_level_keys_case_insensitive() {
        let input = json!({
            "apiKey": "sk-123",
            "API_KEY": "sk-456",
            "Password": "hunter2",
            "prompt": "A volcano at dusk",
        });
        let out = sanitize_value(&input);
        assert_eq!(out["apiKey"], REDACTED);
        assert_eq!(out["API_KEY"], REDACTED);
        assert_eq!(out["Password"], REDACTED);
        assert_eq!(out["prompt"], "A volcano at dusk");
    }

    #[test]
    fn test_redacts_nested_objects_and_arrays() {
        let input = json!({
            "credentials": { "replicateToken": "r8_x", "team": "crafters" },
            "elements": [
                { "id": "1", "text": "Fire" },
                { "id": "2", "clientSecret": "abc" }
            ]
        });
        let out = sanitize_value(&input);
        assert_eq!(out["credentials"]["replicateToken"], REDACTED);
        assert_eq!(out["credentials"]["team"], "crafters");
        assert_eq!(out["elements"][0], json!({ "id": "1", "text": "Fire" }));
        assert_eq!(out["elements"][1]["clientSecret"], REDACTED);
        assert_eq!(out["elements"][1]["id"], "2");
    }

    #[test]
    fn test_redacts_whole_subtree_under_sensitive_key() {
        let input = json!({ "keys": { "a": 1, "b": [1, 2] } });
        assert_eq!(sanitize_value(&input), json!({ "keys": REDACTED }));
    }

    #[test]
    fn test_leaves_scalars_and_clean_objects_alone() {
        let clean = json!({ "model": "flux", "steps": 4, "nested": [true, null, "x"] });
        assert_eq!(sanitize_value(&clean), clean);
        assert_eq!(sanitize_value(&json!("token")), json!("token"));
    }

    #[test]
    fn test_truncate_body_multibyte_safe() {
        let body = "é".repeat(400);
        let out = truncate_body(&body);
        assert!(out.ends_with("... (truncated)"));
        assert!(out.len() < body.len());
    }

    #[test]
    fn test_truncate_body_short_unchanged() {
        assert_eq!(truncate_body("bad request"), "bad request");
    }

    #[test]
    fn test_abbreviate_data_uri() {
        let uri = format!("data:image/png;base64,{}", "A".repeat(100));
        let out = abbreviate_url(&uri);
        assert!(out.starts_with("data:image/png;base64,<"));
        assert_eq!(abbreviate_url("https://img/x.jpg"), "https://img/x.jpg");
    }
}
