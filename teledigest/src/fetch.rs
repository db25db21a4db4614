use anyhow::{Context, Result};
use common::SourceSettings;
use reqwest::Client;
use tracing::warn;

/// Outcome of fetching a page from the source platform.
///
/// Source pages fail softly: an unreachable page is a normal value the caller turns into
/// "nothing harvested", never an error that unwinds the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFetch {
    Loaded(String),
    Unavailable { reason: String },
}

/// The two page shapes served by the channel preview site.
#[async_trait::async_trait]
pub trait SourceClient: Send + Sync {
    /// Listing page of a whole channel (first page only).
    async fn listing_page(&self, channel: &str) -> PageFetch;

    /// Standalone page of one post, `post_id` being `<channel>/<number>`.
    async fn single_post_page(&self, post_id: &str) -> PageFetch;
}

/// reqwest-backed client for the public web preview.
pub struct HttpSource {
    client: Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.fetch_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn listing_url(&self, channel: &str) -> String {
        format!("{}/s/{}", self.base_url, channel)
    }

    pub fn single_post_url(&self, post_id: &str) -> String {
        format!("{}/{}?single", self.base_url, post_id)
    }

    async fn get_page(&self, url: &str) -> PageFetch {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("timed out: {}", e)
                } else {
                    format!("network error: {}", e)
                };
                warn!(%url, %reason, "source page fetch failed");
                return PageFetch::Unavailable { reason };
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "source page fetch returned non-success status");
            return PageFetch::Unavailable {
                reason: format!("HTTP status {}", status),
            };
        }

        match response.text().await {
            Ok(body) => PageFetch::Loaded(body),
            Err(e) => {
                warn!(%url, error = %e, "failed to read source page body");
                PageFetch::Unavailable {
                    reason: format!("body read failed: {}", e),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl SourceClient for HttpSource {
    async fn listing_page(&self, channel: &str) -> PageFetch {
        let url = self.listing_url(channel);
        self.get_page(&url).await
    }

    async fn single_post_page(&self, post_id: &str) -> PageFetch {
        let url = self.single_post_url(post_id);
        self.get_page(&url).await
    }
}
