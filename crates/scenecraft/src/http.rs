//! Shared HTTP client setup for the provider clients.

use std::time::Duration;

use reqwest::{Client, Response};

use crate::sanitize;

/// Default connect timeout for provider requests.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout. Covers Replicate's `Prefer: wait`, which holds
/// the submit request open for up to a minute.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(75);

pub fn create_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .user_agent(concat!("scenecraft/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Reads a failed response into `"<status>: <truncated body>"`.
///
/// Prefers the provider's own error message when the body is JSON with an
/// `error`, `detail` or `message` field.
pub async fn describe_failure(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or(body);
    format!("{}: {}", status, sanitize::truncate_body(&message))
}

pub fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    for key in ["error", "detail", "message"] {
        match value.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(serde_json::Value::Object(obj)) => {
                if let Some(serde_json::Value::String(s)) = obj.get("message") {
                    return Some(s.clone());
                }
            }
            Some(other) if !other.is_null() => return Some(other.to_string()),
            _ => {}
        }
    }
    None
}
