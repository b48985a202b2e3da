//! Character portrait generation.
//!
//! Two upstream wire formats are supported and picked once per call from the
//! configured URL:
//!
//! - **Multimodal**: message-style `input.messages[].content[]` bodies
//! - **Flat**: `images/generations` style bodies with a top-level `prompt`
//!
//! A source image can be encoded several ways; providers disagree on which
//! they accept, so each encoding is tried in turn before falling back to a
//! prompt-only request.

use super::retry::is_invalid_image_param_error;
use super::transport::{
    HttpClientConfig, HttpTransport, JsonRequest, ReqwestTransport, ensure_success,
};
use crate::{Capability, Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Multimodal generation path.
pub const MULTIMODAL_GENERATION_PATH: &str = "/api/v1/services/aigc/multimodal-generation/generation";

/// Flat image generation path.
pub const FLAT_GENERATION_PATH: &str = "/v1/byteplus/images/generations";

const DASHSCOPE_HOST: &str = "dashscope.aliyuncs.com";
const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Image generation wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageProvider {
    /// Message-style multimodal generation.
    Multimodal,
    /// Flat `images/generations` request.
    Flat,
}

impl ImageProvider {
    /// Picks the wire format for a resolved request URL.
    #[must_use]
    pub fn detect(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.contains(MULTIMODAL_GENERATION_PATH) || lower.contains(DASHSCOPE_HOST) {
            Self::Multimodal
        } else {
            Self::Flat
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Multimodal => "multimodal",
            Self::Flat => "flat",
        }
    }
}

/// Resolves the request URL from a configured base or full URL.
#[must_use]
pub fn resolve_generation_url(configured: &str) -> String {
    let trimmed = configured.trim().trim_end_matches('/');
    if trimmed.contains(MULTIMODAL_GENERATION_PATH) || trimmed.contains(FLAT_GENERATION_PATH) {
        return trimmed.to_string();
    }
    if trimmed.to_lowercase().contains(DASHSCOPE_HOST) {
        return format!("{trimmed}{MULTIMODAL_GENERATION_PATH}");
    }
    format!("{trimmed}{FLAT_GENERATION_PATH}")
}

/// Encodings of a source image to try, in order.
///
/// A URL is sent as-is. A data URI is tried as its bare payload, then as the
/// full URI. Raw base64 is tried bare, then wrapped as a JPEG data URI.
#[must_use]
pub fn source_image_candidates(source: &str) -> Vec<String> {
    let source = source.trim();
    if source.is_empty() {
        return Vec::new();
    }
    let lower = source.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return vec![source.to_string()];
    }
    if lower.starts_with("data:image") {
        return match source.split_once(',') {
            Some((_, payload)) if !payload.trim().is_empty() => {
                vec![payload.trim().to_string(), source.to_string()]
            },
            _ => vec![source.to_string()],
        };
    }
    vec![
        source.to_string(),
        format!("data:image/jpeg;base64,{source}"),
    ]
}

/// Image adapter settings.
#[derive(Clone)]
pub struct ImageConfig {
    /// Base URL or full generation URL.
    pub base_url: String,
    /// Bearer key; `None` leaves image generation unavailable.
    pub api_key: Option<SecretString>,
    /// Model name.
    pub model: String,
    /// Flat-format `response_format` (`url` or `b64_json`).
    pub response_format: String,
    /// Optional `x-app-id` header, sent only to flat endpoints.
    pub app_id: Option<String>,
    /// Timeout for downloading generated images.
    pub download_timeout: Duration,
}

impl ImageConfig {
    /// Default base URL.
    pub const DEFAULT_BASE_URL: &'static str = "https://dashscope.aliyuncs.com";
    /// Default model.
    pub const DEFAULT_MODEL: &'static str = "wan2.6-image";
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: Self::DEFAULT_MODEL.to_string(),
            response_format: "url".to_string(),
            app_id: None,
            download_timeout: Duration::from_secs(20),
        }
    }
}

impl std::fmt::Debug for ImageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("response_format", &self.response_format)
            .field("app_id", &self.app_id)
            .field("download_timeout", &self.download_timeout)
            .finish()
    }
}

/// Downloaded or decoded image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    /// Encoded image.
    pub bytes: Vec<u8>,
    /// MIME type.
    pub mime_type: String,
}

/// Character portrait adapter.
pub struct ImageAdapter {
    config: ImageConfig,
    transport: Arc<dyn HttpTransport>,
}

impl ImageAdapter {
    /// Creates an adapter with the production transport.
    #[must_use]
    pub fn new(config: ImageConfig) -> Self {
        Self {
            config,
            transport: Arc::new(ReqwestTransport::new(HttpClientConfig::default())),
        }
    }

    /// Replaces the HTTP transport.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Returns true when a key and model are configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config
            .api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().trim().is_empty())
            && !self.config.model.trim().is_empty()
    }

    /// Generates a portrait and returns its URL or a PNG data URI.
    ///
    /// With a source image, every encoding from [`source_image_candidates`]
    /// is tried; rejections of the `image` parameter move to the next
    /// encoding and exhaustion triggers one prompt-only request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityUnavailable`] when unconfigured,
    /// [`Error::InvalidInput`] for an empty prompt, or the first failure that
    /// is not an image-parameter rejection.
    #[instrument(skip(self, prompt, source_image), fields(has_source = source_image.is_some()))]
    pub fn generate_character_image(
        &self,
        prompt: &str,
        source_image: Option<&str>,
    ) -> Result<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(Error::InvalidInput("image prompt is empty".to_string()));
        }
        if !self.is_configured() {
            return Err(Error::CapabilityUnavailable(Capability::Image));
        }

        let url = resolve_generation_url(&self.config.base_url);
        let provider = ImageProvider::detect(&url);
        let candidates = source_image.map(source_image_candidates).unwrap_or_default();

        for (index, candidate) in candidates.iter().enumerate() {
            match self.request(&url, provider, prompt, Some(candidate)) {
                Ok(image) => return Ok(image),
                Err(err) if is_invalid_image_param_error(&err) => {
                    tracing::warn!(
                        provider = provider.as_str(),
                        candidate = index,
                        error = %err,
                        "Source image rejected, trying next encoding"
                    );
                },
                Err(err) => return Err(err),
            }
        }

        if !candidates.is_empty() {
            tracing::warn!(
                provider = provider.as_str(),
                "All source image encodings rejected, generating from prompt only"
            );
            metrics::counter!("cityling_fallbacks_total", "kind" => "image_prompt_only")
                .increment(1);
        }
        self.request(&url, provider, prompt, None)
    }

    fn request(
        &self,
        url: &str,
        provider: ImageProvider,
        prompt: &str,
        image: Option<&str>,
    ) -> Result<String> {
        let body = match provider {
            ImageProvider::Multimodal => self.multimodal_body(prompt, image),
            ImageProvider::Flat => self.flat_body(prompt, image),
        };
        let mut headers: Vec<(&str, &str)> = Vec::new();
        if provider == ImageProvider::Flat {
            if let Some(app_id) = self.config.app_id.as_deref().filter(|v| !v.trim().is_empty()) {
                headers.push(("x-app-id", app_id.trim()));
            }
        }

        tracing::info!(
            provider = provider.as_str(),
            model = %self.config.model,
            with_image = image.is_some(),
            "Sending image generation request"
        );
        let response = self.transport.post_json(&JsonRequest {
            url,
            bearer: self.config.api_key.as_ref(),
            headers: &headers,
            body: &body,
            timeout: None,
        })?;
        let response = ensure_success("generate_image", response)?;
        parse_image_response(&response.body)
    }

    fn multimodal_body(&self, prompt: &str, image: Option<&str>) -> Value {
        let mut content = vec![json!({ "text": prompt })];
        if let Some(image) = image {
            content.push(json!({ "image": image }));
        }
        json!({
            "model": self.config.model.trim(),
            "input": {
                "messages": [{ "role": "user", "content": content }]
            },
            "parameters": {
                "prompt_extend": true,
                "watermark": false,
                "n": 1,
                "enable_interleave": false,
                "size": "1280*1280"
            }
        })
    }

    fn flat_body(&self, prompt: &str, image: Option<&str>) -> Value {
        let response_format = match self.config.response_format.trim() {
            "" => "url",
            other => other,
        };
        let mut body = json!({
            "model": self.config.model.trim(),
            "prompt": prompt,
            "n": 1,
            "response_format": response_format,
            "size": "2K",
            "stream": false,
            "watermark": false
        });
        if let (Some(image), Some(map)) = (image, body.as_object_mut()) {
            map.insert("image".to_string(), Value::String(image.to_string()));
        }
        body
    }

    /// Fetches a generated image, decoding `data:` URIs locally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an undecodable data URI, or an
    /// upstream error when the download fails or returns no bytes.
    pub fn download_image(&self, url: &str) -> Result<DownloadedImage> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidInput("image url is empty".to_string()));
        }
        if url.to_lowercase().starts_with("data:image") {
            return decode_data_uri(url);
        }

        let response = self.transport.get(url, Some(self.config.download_timeout))?;
        let response = ensure_success("download_image", response)?;
        if response.body.is_empty() {
            return Err(Error::InvalidResponse("downloaded image is empty".to_string()));
        }
        let mime_type = response
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_IMAGE_MIME)
            .to_string();
        Ok(DownloadedImage {
            bytes: response.body,
            mime_type,
        })
    }
}

/// Decodes a `data:image/...;base64,` URI.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when the URI is not base64 encoded.
pub fn decode_data_uri(uri: &str) -> Result<DownloadedImage> {
    let (header, payload) = uri
        .split_once(',')
        .ok_or_else(|| Error::InvalidInput("data uri has no payload".to_string()))?;
    if !header.to_lowercase().contains(";base64") {
        return Err(Error::InvalidInput("data uri is not base64 encoded".to_string()));
    }
    let mime_type = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .map(str::trim)
        .filter(|mime| !mime.is_empty())
        .unwrap_or(DEFAULT_IMAGE_MIME)
        .to_string();
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::InvalidInput(format!("data uri payload is not valid base64: {e}")))?;
    Ok(DownloadedImage { bytes, mime_type })
}

fn error_message(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), ToString::to_string),
        other => other.to_string(),
    }
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn png_data_uri(b64: &str) -> String {
    format!("data:image/png;base64,{b64}")
}

/// Inline payloads win over references: `b64_json`, then `image`, then `url`.
fn generated_image_value(item: &Value) -> Option<String> {
    non_empty_str(item, "b64_json")
        .or_else(|| non_empty_str(item, "b64_image"))
        .map(png_data_uri)
        .or_else(|| non_empty_str(item, "image").map(ToString::to_string))
        .or_else(|| non_empty_str(item, "url").map(ToString::to_string))
}

/// Extracts the first image from either wire format's response.
fn parse_image_response(body: &[u8]) -> Result<String> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidResponse(format!("image response is not JSON: {e}")))?;

    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        return Err(Error::upstream("generate_image", error_message(err)));
    }
    if let Some(code) = value.get("code").filter(|c| !c.is_null()).map(|c| match c {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string(),
    }) {
        let lower = code.to_lowercase();
        if !code.is_empty() && !matches!(lower.as_str(), "ok" | "200" | "0" | "success") {
            let message = non_empty_str(&value, "message").unwrap_or("unknown error");
            return Err(Error::upstream("generate_image", format!("{code}: {message}")));
        }
    }

    let output = value.get("output");
    let from_choices = output
        .and_then(|o| o.get("choices"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|choice| choice.pointer("/message/content").and_then(Value::as_array))
        .flatten()
        .find_map(generated_image_value);
    if let Some(image) = from_choices {
        return Ok(image);
    }

    let from_results = output
        .and_then(|o| o.get("results"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(generated_image_value);
    if let Some(image) = from_results {
        return Ok(image);
    }

    if let Some(image) = output
        .and_then(|o| o.get("image"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Ok(image.to_string());
    }

    let from_images = output
        .and_then(|o| o.get("images"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(|item| match item {
            Value::String(url) if !url.trim().is_empty() => Some(url.trim().to_string()),
            other => non_empty_str(other, "url").map(ToString::to_string),
        });
    if let Some(image) = from_images {
        return Ok(image);
    }

    if let Some(items) = value.get("data").and_then(Value::as_array) {
        for item in items {
            if let Some(b64) = non_empty_str(item, "b64_json") {
                return Ok(png_data_uri(b64));
            }
            if let Some(url) = non_empty_str(item, "url") {
                return Ok(url.to_string());
            }
            if let Some(err) = item.get("error").filter(|e| !e.is_null()) {
                return Err(Error::upstream("generate_image", error_message(err)));
            }
        }
    }

    Err(Error::InvalidResponse(
        "image response contains no image".to_string(),
    ))
}
