//! fal.ai queue client.
//!
//! Submissions go to the queue endpoint and come back with a request id plus
//! status and response URLs. The status endpoint reports `IN_QUEUE`,
//! `IN_PROGRESS` or `COMPLETED`; the finished payload is then read from the
//! response URL.

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

const PROVIDER: &str = "fal";
const DEFAULT_QUEUE_BASE: &str = "https://queue.fal.run";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSubmission {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub response_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub images: Vec<FalImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub response_url: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FalImage {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FalOutput {
    #[serde(default)]
    pub images: Vec<FalImage>,
}

impl FalOutput {
    pub fn first_image(&self) -> Option<ImageResult> {
        first_image(&self.images)
    }
}

fn first_image(images: &[FalImage]) -> Option<ImageResult> {
    images
        .iter()
        .find(|image| !image.url.trim().is_empty())
        .map(|image| image_from_output(&image.url, image.content_type.as_deref()))
}

/// Where the queue status check stands. `Completed` carries the response URL
/// reported by the status endpoint, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Pending,
    Completed(Option<String>),
    Failed(String),
}

impl QueueStatus {
    pub fn state(&self) -> QueueState {
        match self.status.to_ascii_uppercase().as_str() {
            "COMPLETED" => QueueState::Completed(self.response_url.clone()),
            "FAILED" | "ERROR" | "CANCELLED" | "CANCELED" => {
                let message = match &self.error {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) if !other.is_null() => other.to_string(),
                    _ => format!("request {}", self.status.to_ascii_lowercase()),
                };
                QueueState::Failed(message)
            }
            _ => QueueState::Pending,
        }
    }
}

/// Status URL for a request when the submission did not report one.
///
/// The queue addresses requests by the app's first two path segments, so
/// `fal-ai/flux/dev` polls under `fal-ai/flux`.
pub fn fallback_status_url(queue_base: &str, endpoint: &str, request_id: &str) -> String {
    let app: Vec<&str> = endpoint.split('/').filter(|s| !s.is_empty()).take(2).collect();
    format!(
        "{}/{}/requests/{}/status",
        queue_base,
        app.join("/"),
        request_id
    )
}

fn fallback_response_url(status_url: &str) -> String {
    status_url
        .strip_suffix("/status")
        .unwrap_or(status_url)
        .to_string()
}

pub struct FalClient {
    http: reqwest::Client,
    queue_base: String,
    policy: PollPolicy,
}

impl FalClient {
    pub fn new(http: reqwest::Client, policy: PollPolicy) -> Self {
        Self::with_queue_base(http, policy, DEFAULT_QUEUE_BASE)
    }

    pub fn with_queue_base(
        http: reqwest::Client,
        policy: PollPolicy,
        queue_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            queue_base: queue_base.into().trim_end_matches('/').to_string(),
            policy,
        }
    }

    /// `sync_mode` stays off: it makes fal answer with `data:` URIs, which
    /// would travel to the page as multi-megabyte render messages.
    fn submission_body(prompt: &str) -> Value {
        json!({
            "prompt": prompt,
            "image_size": "landscape_16_9",
            "num_images": 1,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        api_key: &SecretString,
    ) -> Result<T, GenerationError> {
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Key {}", api_key.expose_secret()))
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
impl ImageGenerator for FalClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fal
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
        if model.provider != ProviderKind::Fal {
            return Err(GenerationError::UnknownModel(model_id.to_string()));
        }

        let endpoint = format!("{}/{}", self.queue_base, model.model);
        info!("Submitting fal request to {}", model.model);

        let response = self
            .http
            .post(&endpoint)
            .header("Authorization", format!("Key {}", api_key.expose_secret()))
            .json(&Self::submission_body(prompt))
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

        let submission: QueueSubmission = response
            .json()
            .await
            .map_err(|e| GenerationError::invalid_response(PROVIDER, e.to_string()))?;

        // The queue may answer with the images directly
        if let Some(image) = first_image(&submission.images) {
            debug!("fal answered inline: {}", sanitize::abbreviate_url(&image.url));
            return Ok(image);
        }

        let request_id = submission
            .request_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GenerationError::invalid_response(PROVIDER, "missing request_id"))?;
        let status_url = submission
            .status_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| fallback_status_url(&self.queue_base, &model.model, &request_id));
        let submitted_response_url = submission
            .response_url
            .clone()
            .filter(|u| !u.trim().is_empty());

        debug!("fal request {} queued", request_id);
        let reported_response_url = poll_until_complete(PROVIDER, self.policy, |_| {
            let status_url = status_url.clone();
            async move {
                let status: QueueStatus = self.get_json(&status_url, api_key).await?;
                Ok(match status.state() {
                    QueueState::Pending => PollStatus::Pending,
                    QueueState::Completed(url) => PollStatus::Completed(url),
                    QueueState::Failed(message) => PollStatus::Failed(message),
                })
            }
        })
        .await?;

        let response_url = reported_response_url
            .or(submitted_response_url)
            .unwrap_or_else(|| fallback_response_url(&status_url));
        let output: FalOutput = self.get_json(&response_url, api_key).await?;
        output
            .first_image()
            .ok_or_else(|| GenerationError::invalid_response(PROVIDER, "response has no images"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::fake_server::FakeServer;
    use crate::image::ImageType;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn client() -> FalClient {
        FalClient::new(
            reqwest::Client::new(),
            PollPolicy::new(Duration::from_millis(500), 40),
        )
    }

    fn status(value: Value) -> QueueStatus {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_queue_states() {
        assert_eq!(status(json!({ "status": "IN_QUEUE" })).state(), QueueState::Pending);
        assert_eq!(status(json!({ "status": "IN_PROGRESS" })).state(), QueueState::Pending);
        assert_eq!(
            status(json!({ "status": "COMPLETED", "response_url": "https://q/r/1" })).state(),
            QueueState::Completed(Some("https://q/r/1".to_string()))
        );
    }

    #[test]
    fn test_failure_states_are_terminal() {
        for s in ["FAILED", "ERROR", "CANCELLED"] {
            assert!(matches!(status(json!({ "status": s })).state(), QueueState::Failed(_)));
        }
        assert_eq!(
            status(json!({ "status": "ERROR", "error": "model crashed" })).state(),
            QueueState::Failed("model crashed".to_string())
        );
    }

    #[test]
    fn test_fallback_status_url_uses_app_segments() {
        assert_eq!(
            fallback_status_url("https://queue.fal.run", "fal-ai/flux/dev", "req-1"),
            "https://queue.fal.run/fal-ai/flux/requests/req-1/status"
        );
        assert_eq!(
            fallback_status_url("https://queue.fal.run", "fal-ai/recraft-v3", "req-2"),
            "https://queue.fal.run/fal-ai/recraft-v3/requests/req-2/status"
        );
    }

    #[test]
    fn test_fallback_response_url_strips_status() {
        assert_eq!(
            fallback_response_url("https://queue.fal.run/fal-ai/flux/requests/r/status"),
            "https://queue.fal.run/fal-ai/flux/requests/r"
        );
    }

    #[test]
    fn test_output_uses_content_type_hint() {
        let output: FalOutput = serde_json::from_value(json!({
            "images": [{ "url": "https://fal.media/files/abc", "content_type": "image/png" }]
        }))
        .unwrap();
        let image = output.first_image().unwrap();
        assert_eq!(image.image_type, ImageType::Png);
        assert_eq!(image.base64, None);
    }

    #[test]
    fn test_inline_output_lifts_data_uri() {
        let output: FalOutput = serde_json::from_value(json!({
            "images": [{ "url": "data:image/jpeg;base64,/9j/4AAQ", "content_type": "image/jpeg" }]
        }))
        .unwrap();
        let image = output.first_image().unwrap();
        assert_eq!(image.base64.as_deref(), Some("/9j/4AAQ"));
    }

    #[test]
    fn test_empty_output_has_no_image() {
        assert!(FalOutput::default().first_image().is_none());
    }

    #[tokio::test]
    async fn test_empty_key_fails_before_network() {
        let result = client()
            .generate("A forge", &SecretString::from(String::new()), "fal:flux-dev")
            .await;
        assert!(matches!(result, Err(GenerationError::Auth { provider: "fal" })));
    }

    #[tokio::test]
    async fn test_replicate_model_rejected() {
        let result = client()
            .generate("A forge", &SecretString::from("fal_x".to_string()), "replicate:a/b")
            .await;
        assert!(matches!(result, Err(GenerationError::UnknownModel(_))));
    }

    fn fast_client(base: &str) -> FalClient {
        FalClient::with_queue_base(
            reqwest::Client::new(),
            PollPolicy::new(Duration::from_millis(1), 40),
            base,
        )
    }

    fn key() -> SecretString {
        SecretString::from("fal_test".to_string())
    }

    #[test]
    fn test_submission_does_not_request_inline_images() {
        let body = FalClient::submission_body("A forge");
        assert_eq!(body["image_size"], "landscape_16_9");
        assert!(body.get("sync_mode").is_none());
    }

    #[tokio::test]
    async fn test_images_in_submission_skip_polling() {
        let server = FakeServer::start(|req| match req.method {
            "POST" => (
                200,
                json!({ "images": [{ "url": "https://fal.media/files/a.png", "content_type": "image/png" }] }),
            ),
            _ => (500, json!({ "detail": "unexpected poll" })),
        })
        .await;

        let image = fast_client(&server.base)
            .generate("A forge", &key(), "fal:flux-schnell")
            .await
            .unwrap();

        assert_eq!(image.url, "https://fal.media/files/a.png");
        assert_eq!(image.image_type, ImageType::Png);
        assert_eq!(server.requests(), vec!["POST /fal-ai/flux/schnell".to_string()]);
    }

    #[tokio::test]
    async fn test_completed_request_reads_response_url() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let server = FakeServer::start(move |req| match (req.method, req.path) {
            ("POST", _) => (
                200,
                json!({
                    "request_id": "r1",
                    "status": "IN_QUEUE",
                    "status_url": format!("{}/fal-ai/flux/requests/r1/status", req.base),
                    "response_url": format!("{}/fal-ai/flux/requests/r1", req.base),
                }),
            ),
            ("GET", "/fal-ai/flux/requests/r1/status") => {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    (200, json!({ "status": "IN_PROGRESS" }))
                } else {
                    (200, json!({ "status": "COMPLETED" }))
                }
            }
            ("GET", "/fal-ai/flux/requests/r1") => (
                200,
                json!({ "images": [{ "url": "https://fal.media/files/r1.jpg" }] }),
            ),
            _ => (404, json!({ "detail": "not found" })),
        })
        .await;

        let image = fast_client(&server.base)
            .generate("A forge", &key(), "fal:flux-dev")
            .await
            .unwrap();

        assert_eq!(image.url, "https://fal.media/files/r1.jpg");
        assert_eq!(server.count("GET /fal-ai/flux/requests/r1/status"), 3);
        assert_eq!(server.count("GET /fal-ai/flux/requests/r1"), 1);
    }

    #[tokio::test]
    async fn test_always_pending_times_out_after_forty_polls() {
        // No status URL in the submission: the client builds it itself.
        let server = FakeServer::start(|req| match req.method {
            "POST" => (200, json!({ "request_id": "r2", "status": "IN_QUEUE" })),
            _ => (200, json!({ "status": "IN_PROGRESS" })),
        })
        .await;

        let result = fast_client(&server.base)
            .generate("A forge", &key(), "fal:flux-dev")
            .await;

        assert!(matches!(
            result,
            Err(GenerationError::Timeout { provider: "fal", attempts: 40 })
        ));
        assert_eq!(server.count("GET /fal-ai/flux/requests/r2/status"), 40);
    }

    #[tokio::test]
    async fn test_unknown_alias_rejected() {
        let result = client()
            .generate("A forge", &SecretString::from("fal_x".to_string()), "fal:nope")
            .await;
        assert!(matches!(result, Err(GenerationError::UnknownModel(_))));
    }
}
