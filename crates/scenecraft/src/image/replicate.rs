//! Replicate predictions client.
//!
//! Submits with `Prefer: wait` so most predictions come back finished in the
//! submit response; anything still `starting`/`processing` is polled through
//! the prediction's `urls.get` endpoint.

use async_trait::async_trait;
use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};

use super::payload::image_from_output;
use super::poll::{poll_until_complete, PollPolicy, PollStatus};
use super::{ImageGenerator, ImageModel, ImageResult, ProviderKind};
use crate::error::GenerationError;
use crate::http::describe_failure;
use crate::sanitize;
use crate::secrets::is_present;

const PROVIDER: &str = "replicate";
const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";

/// Seconds Replicate may hold the submit request open.
const PREFER_WAIT: &str = "wait=60";

#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub urls: Option<PredictionUrls>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionUrls {
    #[serde(default)]
    pub get: Option<String>,
}

impl Prediction {
    /// Maps the prediction onto the poll machine's states.
    pub fn poll_status(&self) -> Result<PollStatus<ImageResult>, GenerationError> {
        match self.status.to_ascii_lowercase().as_str() {
            "succeeded" => {
                let url = self
                    .output
                    .as_ref()
                    .and_then(first_output)
                    .ok_or_else(|| {
                        GenerationError::invalid_response(PROVIDER, "prediction has no output")
                    })?;
                Ok(PollStatus::Completed(image_from_output(&url, None)))
            }
            "failed" | "canceled" | "cancelled" => {
                let message = self
                    .error
                    .as_ref()
                    .map(|e| match e {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| format!("prediction {}", self.status));
                Ok(PollStatus::Failed(message))
            }
            _ => Ok(PollStatus::Pending),
        }
    }
}

/// First usable output: a URL or `data:` URI, either bare or the first
/// element of an array.
fn first_output(output: &Value) -> Option<String> {
    match output {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(first_output),
        Value::Object(obj) => obj
            .get("url")
            .or_else(|| obj.get("image"))
            .and_then(first_output),
        _ => None,
    }
}

pub struct ReplicateClient {
    http: reqwest::Client,
    api_base: String,
    policy: PollPolicy,
}

impl ReplicateClient {
    pub fn new(http: reqwest::Client, policy: PollPolicy) -> Self {
        Self::with_api_base(http, policy, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        http: reqwest::Client,
        policy: PollPolicy,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            policy,
        }
    }

    /// Endpoint and body for a model reference. `owner/name:version` pins a
    /// version through the generic predictions endpoint.
    fn submission(&self, model: &str, prompt: &str) -> (String, Value) {
        let input = json!({
            "prompt": prompt,
            "aspect_ratio": "16:9",
            "num_outputs": 1,
            "output_format": "jpg",
        });
        match model.split_once(':') {
            Some((_, version)) => (
                format!("{}/predictions", self.api_base),
                json!({ "version": version, "input": input }),
            ),
            None => (
                format!("{}/models/{}/predictions", self.api_base, model),
                json!({ "input": input }),
            ),
        }
    }

    async fn fetch_prediction(
        &self,
        url: &str,
        api_key: &SecretString,
    ) -> Result<Prediction, GenerationError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(api_key.expose_secret())
            .send()
            .await
            .map_err(|e| GenerationError::Network {
                provider: PROVIDER,
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(GenerationError::upstream(
                PROVIDER,
                describe_failure(response).await,
            ));
        }

        response
            .json()
            .await
            .map_err(|e| GenerationError::invalid_response(PROVIDER, e.to_string()))
    }
}

#[async_trait]
impl ImageGenerator for ReplicateClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Replicate
    }

    async fn generate(
        &self,
        prompt: &str,
        api_key: &SecretString,
        model_id: &str,
    ) -> Result<ImageResult, GenerationError> {
        if !is_present(api_key) {
            return Err(GenerationError::Auth { provider: PROVIDER });
        }
        let model = ImageModel::parse(model_id)?;
        if model.provider != ProviderKind::Replicate {
            return Err(GenerationError::UnknownModel(model_id.to_string()));
        }

        let (endpoint, body) = self.submission(&model.model, prompt);
        info!("Submitting Replicate prediction for {}", model.model);

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key.expose_secret())
            .header("Prefer", PREFER_WAIT)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Network {
                provider: PROVIDER,
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(GenerationError::upstream(
                PROVIDER,
                describe_failure(response).await,
            ));
        }

        let prediction: Prediction = response
            .json()
            .await
            .map_err(|e| GenerationError::invalid_response(PROVIDER, e.to_string()))?;

        match prediction.poll_status()? {
            PollStatus::Completed(image) => {
                debug!(
                    "Replicate prediction {} finished on submit: {}",
                    prediction.id,
                    sanitize::abbreviate_url(&image.url)
                );
                return Ok(image);
            }
            PollStatus::Failed(message) => {
                return Err(GenerationError::upstream(PROVIDER, message));
            }
            PollStatus::Pending => {}
        }

        let poll_url = prediction
            .urls
            .as_ref()
            .and_then(|u| u.get.clone())
            .filter(|u| !u.trim().is_empty())
            .or_else(|| {
                (!prediction.id.is_empty())
                    .then(|| format!("{}/predictions/{}", self.api_base, prediction.id))
            })
            .ok_or_else(|| {
                GenerationError::invalid_response(PROVIDER, "prediction missing poll URL")
            })?;

        debug!("Replicate prediction {} pending, polling", prediction.id);
        poll_until_complete(PROVIDER, self.policy, |_| {
            let poll_url = poll_url.clone();
            async move {
                let prediction = self.fetch_prediction(&poll_url, api_key).await?;
                prediction.poll_status()
            }
        })
        .await
    }
}
