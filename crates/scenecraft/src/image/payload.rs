//! Inline image payloads: `data:` URIs, type detection, fetch-and-encode.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::debug;

use super::{ImageResult, ImageType};
use crate::error::GenerationError;
use crate::sanitize;

/// The parts of a `data:<mime>[;base64],<payload>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri<'a> {
    pub mime: &'a str,
    pub is_base64: bool,
    pub payload: &'a str,
}

pub fn parse_data_uri(value: &str) -> Option<DataUri<'_>> {
    let rest = value.trim().strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mut parts = meta.split(';');
    let mime = parts.next().unwrap_or("").trim();
    let is_base64 = parts.any(|p| p.trim().eq_ignore_ascii_case("base64"));
    Some(DataUri {
        mime,
        is_base64,
        payload: payload.trim(),
    })
}

/// Guesses the type from the URL path's file extension.
fn type_from_url_extension(url: &str) -> Option<ImageType> {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(|c| c == '?' || c == '#').next().unwrap_or(url).to_string(),
    };
    let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
    if ext.contains('/') {
        return None;
    }
    mime_guess::from_ext(ext)
        .iter()
        .find_map(|mime| ImageType::from_mime(mime.essence_str()))
}

/// Resolves the image type, by precedence: inline `data:` URI mime type,
/// response-declared mime hint, URL file extension, `jpeg`.
pub fn resolve_image_type(url: &str, base64_mime_hint: Option<&str>) -> ImageType {
    if let Some(data) = parse_data_uri(url) {
        if let Some(kind) = ImageType::from_mime(data.mime) {
            return kind;
        }
    }
    if let Some(kind) = base64_mime_hint.and_then(ImageType::from_mime) {
        return kind;
    }
    type_from_url_extension(url).unwrap_or_default()
}

/// Builds an [`ImageResult`] from one provider output value, lifting the
/// base64 payload out of `data:` URIs.
pub fn image_from_output(url: &str, base64_mime_hint: Option<&str>) -> ImageResult {
    let url = url.trim();
    let base64 = parse_data_uri(url)
        .filter(|data| data.is_base64 && !data.payload.is_empty())
        .map(|data| data.payload.to_string());
    ImageResult {
        url: url.to_string(),
        base64,
        image_type: resolve_image_type(url, base64_mime_hint),
    }
}

/// Downloads `image.url` and returns the image as inline base64.
///
/// Only the trace path calls this; the user-facing path renders the URL.
pub async fn fetch_inline(
    http: &reqwest::Client,
    image: &ImageResult,
) -> Result<ImageResult, GenerationError> {
    if image.base64.is_some() {
        return Ok(image.clone());
    }
    debug!("Fetching {} for inline encoding", sanitize::abbreviate_url(&image.url));

    let response = http
        .get(&image.url)
        .send()
        .await
        .map_err(|e| GenerationError::Network {
            provider: "image-download",
            source: e,
        })?;

    if !response.status().is_success() {
        let status = response.status();
        return Err(GenerationError::upstream(
            "image-download",
            format!("download failed ({})", status),
        ));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| GenerationError::Network {
            provider: "image-download",
            source: e,
        })?;

    let image_type = content_type
        .as_deref()
        .and_then(ImageType::from_mime)
        .unwrap_or(image.image_type);

    Ok(ImageResult {
        url: image.url.clone(),
        base64: Some(BASE64.encode(&bytes)),
        image_type,
    })
}

/// Turns a URL-only image into an inline one for the trace record.
#[async_trait]
pub trait ImageInliner: Send + Sync {
    async fn inline(&self, image: &ImageResult) -> Result<ImageResult, GenerationError>;
}

pub struct HttpInliner {
    http: reqwest::Client,
}

impl HttpInliner {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageInliner for HttpInliner {
    async fn inline(&self, image: &ImageResult) -> Result<ImageResult, GenerationError> {
        fetch_inline(&self.http, image).await
    }
}
