use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use crate::extract::MediaSet;

/// Timezone and format used for human-readable post dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayZone {
    pub offset: FixedOffset,
    pub format: String,
}

impl DisplayZone {
    pub fn new(offset: FixedOffset, format: impl Into<String>) -> Self {
        Self {
            offset,
            format: format.into(),
        }
    }

    pub fn format(&self, instant: &DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.offset)
            .format(&self.format)
            .to_string()
    }
}

/// One harvested channel message.
///
/// Only [`Post::new`] creates posts and it refuses empty text, so every `Post` carries a body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    channel: String,
    author: String,
    timestamp: DateTime<Utc>,
    formatted_timestamp: String,
    text: String,
    images: Vec<String>,
    videos: Vec<String>,
}

impl Post {
    /// Build a post, or `None` when `text` is blank. An empty author falls back to the channel.
    pub fn new(
        channel: &str,
        author: Option<&str>,
        timestamp: DateTime<Utc>,
        zone: &DisplayZone,
        text: &str,
        media: MediaSet,
    ) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let author = author
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(channel);

        Some(Self {
            channel: channel.to_string(),
            author: author.to_string(),
            timestamp,
            formatted_timestamp: zone.format(&timestamp),
            text: text.to_string(),
            images: media.images,
            videos: media.videos,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn formatted_timestamp(&self) -> &str {
        &self.formatted_timestamp
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn videos(&self) -> &[String] {
        &self.videos
    }
}
