//! Image providers: routing, the shared result type and the poll machine.

pub mod fal;
#[cfg(test)]
mod fake_server;
pub mod payload;
pub mod poll;
pub mod replicate;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::config::TimingSettings;
use crate::error::GenerationError;

pub use fal::FalClient;
pub use payload::{HttpInliner, ImageInliner};
pub use poll::{poll_until_complete, PollPolicy, PollStatus};
pub use replicate::ReplicateClient;

/// Encoding of a generated image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl ImageType {
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageType::Jpeg),
            "image/png" => Some(ImageType::Png),
            "image/webp" => Some(ImageType::Webp),
            "image/gif" => Some(ImageType::Gif),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ImageType::Jpeg => "image/jpeg",
            ImageType::Png => "image/png",
            ImageType::Webp => "image/webp",
            ImageType::Gif => "image/gif",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageType::Jpeg => "jpeg",
            ImageType::Png => "png",
            ImageType::Webp => "webp",
            ImageType::Gif => "gif",
        };
        write!(f, "{}", name)
    }
}

/// Normalized output of every image provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResult {
    /// Remote URL, or the full `data:` URI when the provider answered inline.
    pub url: String,
    /// Raw base64 payload, when the provider returned one.
    pub base64: Option<String>,
    pub image_type: ImageType,
}

impl ImageResult {
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let image_type = payload::resolve_image_type(&url, None);
        Self {
            url,
            base64: None,
            image_type,
        }
    }

    /// `data:` URI built from the inline payload, if there is one.
    pub fn inline_data_uri(&self) -> Option<String> {
        self.base64
            .as_ref()
            .map(|b64| format!("data:{};base64,{}", self.image_type.mime(), b64))
    }
}

/// Closed set of image providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Replicate,
    Fal,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Replicate => "replicate",
            ProviderKind::Fal => "fal",
        }
    }

    /// Tag that prefixes a model identifier routed to this provider.
    pub fn tag(&self) -> &'static str {
        match self {
            ProviderKind::Replicate => "replicate:",
            ProviderKind::Fal => "fal:",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Model aliases accepted behind the `fal:` tag, with their queue endpoints.
pub const FAL_MODELS: &[(&str, &str)] = &[
    ("flux-schnell", "fal-ai/flux/schnell"),
    ("flux-dev", "fal-ai/flux/dev"),
    ("flux-pro", "fal-ai/flux-pro/v1.1"),
    ("recraft-v3", "fal-ai/recraft-v3"),
];

/// A configured image model identifier resolved to its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageModel {
    pub provider: ProviderKind,
    /// Provider-side model name: `owner/name[:version]` for Replicate, the
    /// queue endpoint path for fal.
    pub model: String,
}

impl ImageModel {
    /// Resolves `replicate:owner/name`, `fal:<alias>` or an untagged
    /// `owner/name` (routed to Replicate).
    pub fn parse(identifier: &str) -> Result<Self, GenerationError> {
        let id = identifier.trim();
        let unknown = || GenerationError::UnknownModel(id.to_string());

        if let Some(alias) = id.strip_prefix(ProviderKind::Fal.tag()) {
            let alias = alias.trim();
            return FAL_MODELS
                .iter()
                .find(|(name, _)| *name == alias)
                .map(|(_, endpoint)| ImageModel {
                    provider: ProviderKind::Fal,
                    model: endpoint.to_string(),
                })
                .ok_or_else(unknown);
        }

        let model = id.strip_prefix(ProviderKind::Replicate.tag()).unwrap_or(id).trim();
        let valid = model
            .split_once('/')
            .is_some_and(|(owner, name)| !owner.is_empty() && !name.is_empty());
        if !valid {
            return Err(unknown());
        }
        Ok(ImageModel {
            provider: ProviderKind::Replicate,
            model: model.to_string(),
        })
    }
}

/// One image provider client.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Renders `prompt` with the model named by `model_id` (a configured
    /// identifier, tag included).
    async fn generate(
        &self,
        prompt: &str,
        api_key: &SecretString,
        model_id: &str,
    ) -> Result<ImageResult, GenerationError>;
}

/// One client per [`ProviderKind`].
#[derive(Clone)]
pub struct ImageProviders {
    replicate: Arc<dyn ImageGenerator>,
    fal: Arc<dyn ImageGenerator>,
}

impl ImageProviders {
    pub fn new(replicate: Arc<dyn ImageGenerator>, fal: Arc<dyn ImageGenerator>) -> Self {
        Self { replicate, fal }
    }

    /// Production clients with the configured poll budgets.
    pub fn from_settings(
        http: reqwest::Client,
        timing: &TimingSettings,
    ) -> Self {
        let replicate = ReplicateClient::new(
            http.clone(),
            PollPolicy::new(timing.poll_interval(), timing.max_polls(ProviderKind::Replicate)),
        );
        let fal = FalClient::new(
            http,
            PollPolicy::new(timing.poll_interval(), timing.max_polls(ProviderKind::Fal)),
        );
        Self::new(Arc::new(replicate), Arc::new(fal))
    }

    pub fn for_kind(&self, kind: ProviderKind) -> &Arc<dyn ImageGenerator> {
        match kind {
            ProviderKind::Replicate => &self.replicate,
            ProviderKind::Fal => &self.fal,
        }
    }
}
