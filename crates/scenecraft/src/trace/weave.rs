//! Weave call API transport.

use async_trait::async_trait;
use log::debug;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;

use super::{CallEnd, CallStart, TraceTransport};
use crate::error::TraceError;
use crate::http::describe_failure;

/// Fixed Basic-auth username; the trace key is the password.
const AUTH_USERNAME: &str = "api";

pub struct WeaveTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
}

impl WeaveTransport {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: SecretString) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, operation: &str) -> String {
        format!("{}/{}", self.base_url, operation)
    }

    async fn post<T: Serialize>(&self, operation: &'static str, body: &T) -> Result<(), TraceError> {
        let response = self
            .http
            .post(self.endpoint(operation))
            .basic_auth(AUTH_USERNAME, Some(self.api_key.expose_secret()))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TraceError::Rejected {
                operation,
                message: describe_failure(response).await,
            });
        }
        debug!("Trace {} accepted", operation);
        Ok(())
    }
}

#[async_trait]
impl TraceTransport for WeaveTransport {
    async fn call_start(&self, start: &CallStart) -> Result<(), TraceError> {
        self.post("call/start", &json!({ "start": start })).await
    }

    async fn call_end(&self, end: &CallEnd) -> Result<(), TraceError> {
        self.post("call/end", &json!({ "end": end })).await
    }
}
