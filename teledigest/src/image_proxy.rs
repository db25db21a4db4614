use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};
use common::ImageProxyConfig;
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, REFERER, USER_AGENT};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_TIMEOUT_MS: u64 = 8000;
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 15 * 1024 * 1024;

pub const PLACEHOLDER_WIDTH: u32 = 1024;
pub const PLACEHOLDER_HEIGHT: u32 = 768;
pub const PLACEHOLDER_LABEL: &str = "Image unavailable";
const PLACEHOLDER_MAX_SIDE: u32 = 4096;
const PLACEHOLDER_BACKGROUND: Rgb<u8> = Rgb([0xEE, 0xEE, 0xEE]);

const IMAGE_ACCEPT: &str =
    "image/jpeg,image/jpg,image/png,image/gif,image/bmp,image/webp,image/avif;q=0.9,*/*;q=0.1";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124 Safari/537.36";

/// Types document editors embed directly; everything else is re-encoded to PNG.
static PASSTHROUGH_CONTENT_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"image/(jpeg|jpg|png)").expect("valid regex"));

/// Resolved `[image_proxy]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageProxySettings {
    pub timeout: Duration,
    pub max_size_bytes: u64,
    /// Lower-case host names; empty accepts any host
    pub allowlist: Vec<String>,
}

impl Default for ImageProxySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            allowlist: Vec::new(),
        }
    }
}

impl ImageProxySettings {
    pub fn from_config(cfg: Option<&ImageProxyConfig>) -> Self {
        let Some(cfg) = cfg else {
            return Self::default();
        };
        Self {
            timeout: Duration::from_millis(cfg.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
            max_size_bytes: cfg.max_size_bytes.unwrap_or(DEFAULT_MAX_SIZE_BYTES),
            allowlist: cfg
                .allowlist
                .iter()
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }
}

/// Requests refused before anything is fetched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyRejection {
    #[error("Missing url")]
    MissingUrl,
    #[error("Bad url")]
    BadUrl,
    #[error("Forbidden host")]
    ForbiddenHost,
}

/// What to answer when the upstream image cannot be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Placeholder,
    Empty,
}

impl Fallback {
    /// `empty` selects [`Fallback::Empty`]; anything else, or nothing, a placeholder.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("empty") => Self::Empty,
            _ => Self::Placeholder,
        }
    }
}

/// Plain placeholder picture served instead of a missing image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub width: u32,
    pub height: u32,
    pub label: String,
}

impl Default for Placeholder {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

impl Placeholder {
    /// Sides are clamped to `1..=4096`.
    pub fn new(width: Option<u32>, height: Option<u32>, label: Option<String>) -> Self {
        Self {
            width: width.unwrap_or(PLACEHOLDER_WIDTH).clamp(1, PLACEHOLDER_MAX_SIDE),
            height: height.unwrap_or(PLACEHOLDER_HEIGHT).clamp(1, PLACEHOLDER_MAX_SIDE),
            label: label
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| PLACEHOLDER_LABEL.to_string()),
        }
    }

    pub fn render(&self) -> Result<Vec<u8>> {
        let canvas = RgbImage::from_pixel(self.width, self.height, PLACEHOLDER_BACKGROUND);
        encode_png(&DynamicImage::ImageRgb8(canvas))
    }
}

/// Per-request options of `/api/image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub referer: Option<String>,
    pub timeout: Option<Duration>,
    pub fallback: Fallback,
    pub placeholder: Placeholder,
}

impl Default for ImageRequest {
    fn default() -> Self {
        Self {
            referer: None,
            timeout: None,
            fallback: Fallback::Placeholder,
            placeholder: Placeholder::default(),
        }
    }
}

/// What the proxy hands back for an accepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Image {
        bytes: Vec<u8>,
        content_type: String,
        /// Upstream status, when one was received
        upstream_status: Option<u16>,
        /// Set when a placeholder stands in for the image (`placeholder`, `too-large`,
        /// `network-error`)
        fallback: Option<&'static str>,
    },
    /// Served as 204 No Content
    Empty { reason: String },
}

/// Why the upstream content could not be served as is.
#[derive(Debug)]
enum Failure {
    Status(u16),
    TooLarge(Option<u16>),
    Network(String),
}

impl Failure {
    fn reason(&self) -> String {
        match self {
            Self::Status(status) => format!("upstream status {}", status),
            Self::TooLarge(_) => "too large".to_string(),
            Self::Network(e) => e.clone(),
        }
    }
}

/// Validate the requested URL against the allowlist.
pub fn parse_target(raw: Option<&str>, allowlist: &[String]) -> Result<Url, ProxyRejection> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ProxyRejection::MissingUrl)?;
    let target = Url::parse(raw).map_err(|_| ProxyRejection::BadUrl)?;
    if !matches!(target.scheme(), "http" | "https") {
        return Err(ProxyRejection::BadUrl);
    }
    let host = target.host_str().ok_or(ProxyRejection::BadUrl)?.to_lowercase();

    if !allowlist.is_empty() && !allowlist.iter().any(|allowed| *allowed == host) {
        return Err(ProxyRejection::ForbiddenHost);
    }
    Ok(target)
}

fn must_convert_to_png(content_type: &str) -> bool {
    !PASSTHROUGH_CONTENT_TYPE.is_match(&content_type.to_lowercase())
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageOutputFormat::Png)
        .context("PNG encoding failed")?;
    Ok(cursor.into_inner())
}

/// Decode any supported format and re-encode it as PNG.
pub fn convert_to_png(bytes: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("failed to decode upstream image")?;
    encode_png(&DynamicImage::ImageRgba8(decoded.to_rgba8()))
}

/// Stateless image fetcher behind `GET /api/image`.
pub struct ImageProxy {
    client: Client,
    settings: ImageProxySettings,
}

impl ImageProxy {
    pub fn new(settings: ImageProxySettings) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build image proxy client")?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ImageProxySettings {
        &self.settings
    }

    /// Fetch `target`. JPEG and PNG pass through; other formats are re-encoded to PNG.
    /// Failures become a placeholder PNG or [`ImageOutcome::Empty`], per `request.fallback`.
    pub async fn fetch(&self, target: &Url, request: &ImageRequest) -> ImageOutcome {
        let failure = match self.fetch_upstream(target, request).await {
            Ok((bytes, content_type, status)) => {
                if !must_convert_to_png(&content_type) {
                    debug!(url = %target, size = bytes.len(), "image_proxy: passed through");
                    return ImageOutcome::Image {
                        bytes,
                        content_type,
                        upstream_status: Some(status),
                        fallback: None,
                    };
                }
                let converted = tokio::task::spawn_blocking(move || convert_to_png(&bytes)).await;
                match converted {
                    Ok(Ok(png)) => {
                        debug!(
                            url = %target,
                            from = %content_type,
                            "image_proxy: converted to PNG"
                        );
                        return ImageOutcome::Image {
                            bytes: png,
                            content_type: "image/png".to_string(),
                            upstream_status: Some(status),
                            fallback: None,
                        };
                    }
                    Ok(Err(e)) => Failure::Network(format!("{:#}", e)),
                    Err(e) => Failure::Network(format!("conversion task failed: {}", e)),
                }
            }
            Err(failure) => failure,
        };

        warn!(url = %target, "image_proxy: {}", failure.reason());
        self.fall_back(failure, request).await
    }

    async fn fetch_upstream(
        &self,
        target: &Url,
        request: &ImageRequest,
    ) -> Result<(Vec<u8>, String, u16), Failure> {
        let referer = request
            .referer
            .clone()
            .unwrap_or_else(|| target.origin().ascii_serialization());
        let timeout = request.timeout.unwrap_or(self.settings.timeout);

        let response = self
            .client
            .get(target.as_str())
            .header(ACCEPT, IMAGE_ACCEPT)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(REFERER, referer)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Failure::Network(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::Status(status.as_u16()));
        }

        let declared_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared_len.is_some_and(|len| len > self.settings.max_size_bytes) {
            return Err(Failure::TooLarge(Some(status.as_u16())));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Failure::Network(format!("body read failed: {}", e)))?;
        if bytes.len() as u64 > self.settings.max_size_bytes {
            return Err(Failure::TooLarge(Some(status.as_u16())));
        }

        Ok((bytes.to_vec(), content_type, status.as_u16()))
    }

    async fn fall_back(&self, failure: Failure, request: &ImageRequest) -> ImageOutcome {
        if request.fallback == Fallback::Empty {
            return ImageOutcome::Empty {
                reason: failure.reason(),
            };
        }

        let (placeholder, tag, upstream_status) = match failure {
            Failure::Status(status) => (request.placeholder.clone(), "placeholder", Some(status)),
            Failure::TooLarge(status) => (
                Placeholder {
                    label: "Too large".to_string(),
                    ..request.placeholder.clone()
                },
                "too-large",
                status,
            ),
            Failure::Network(_) => (request.placeholder.clone(), "network-error", None),
        };

        let rendered = tokio::task::spawn_blocking(move || placeholder.render()).await;
        match rendered {
            Ok(Ok(bytes)) => ImageOutcome::Image {
                bytes,
                content_type: "image/png".to_string(),
                upstream_status,
                fallback: Some(tag),
            },
            Ok(Err(e)) => ImageOutcome::Empty {
                reason: format!("placeholder rendering failed: {:#}", e),
            },
            Err(e) => ImageOutcome::Empty {
                reason: format!("placeholder task failed: {}", e),
            },
        }
    }
}
