use anyhow::Result;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use common::{pause, Config, Pacing};
use scraper::Html;
use tracing::{debug, info, warn};

use crate::extract::dom::{find_all, find_first, DomElement};
use crate::extract::{extract_media, extract_text, MediaSet};
use crate::fetch::{PageFetch, SourceClient};
use crate::pipeline::PipelineError;
use crate::post::{DisplayZone, Post};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::scraping::fetch_single_post;

const MESSAGE_CLASS: &str = "tgme_widget_message";
const OWNER_NAME_CLASS: &str = "tgme_widget_message_owner_name";

/// Everything the harvester needs besides the source client.
#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub zone: DisplayZone,
    pub pacing: Pacing,
}

impl HarvestSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            zone: DisplayZone::new(config.display_offset()?, config.timestamp_format()),
            pacing: config.pacing(),
        })
    }
}

/// One message of a listing page that passed the time cutoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    /// `data-post` identifier (`<channel>/<number>`), needed for the single-post fallback
    pub post_id: Option<String>,
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub text: Option<String>,
    pub media: MediaSet,
}

/// Extract the messages of a listing page published at or after `since`, in document order.
///
/// Entries are not strictly ordered by time on a page, so older or undated ones are skipped
/// individually rather than ending the scan.
pub fn parse_listing(html: &str, since: DateTime<Utc>) -> Vec<ListingEntry> {
    let document = Html::parse_document(html);
    let mut entries = Vec::new();

    for message in find_all(document.root_element(), |e| e.has_class(MESSAGE_CLASS)) {
        let post_id = message.attr("data-post").map(str::to_string);

        let Some(timestamp) = message_timestamp(message) else {
            debug!(?post_id, "skipping message without a usable datetime");
            continue;
        };
        if timestamp < since {
            debug!(?post_id, %timestamp, "skipping message older than cutoff");
            continue;
        }

        let author = find_first(message, |e| e.has_class(OWNER_NAME_CLASS))
            .map(|e| e.text_content().trim().to_string())
            .filter(|a| !a.is_empty());

        entries.push(ListingEntry {
            post_id,
            author,
            timestamp,
            text: extract_text(message),
            media: extract_media(message),
        });
    }

    entries
}

fn message_timestamp<E: DomElement>(message: E) -> Option<DateTime<Utc>> {
    let time = find_first(message, |e| e.tag_name() == "time" && e.attr("datetime").is_some())?;
    let raw = time.attr("datetime")?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Harvest one channel's listing page.
///
/// Messages without inline text are completed from their single-post page, preceded by the
/// fallback delay. The listing's own media is kept when it found any. Messages that still have
/// no text are dropped. An unreachable listing yields no posts.
pub async fn harvest_channel(
    source: &dyn SourceClient,
    channel: &str,
    since: DateTime<Utc>,
    settings: &HarvestSettings,
) -> Vec<Post> {
    info!("ingestion: parsing channel {}", channel);
    let html = match source.listing_page(channel).await {
        PageFetch::Loaded(html) => html,
        PageFetch::Unavailable { reason } => {
            warn!("ingestion: listing for channel {} unavailable: {}", channel, reason);
            return Vec::new();
        }
    };

    let entries = parse_listing(&html, since);
    let mut posts = Vec::with_capacity(entries.len());

    for entry in entries {
        let ListingEntry {
            post_id,
            author,
            timestamp,
            mut text,
            mut media,
        } = entry;

        if text.is_none() {
            if let Some(post_id) = post_id.as_deref() {
                pause(settings.pacing.fallback_delay).await;
                let single = fetch_single_post(source, post_id).await;
                text = single.text;
                if media.is_empty() {
                    media = single.media;
                }
            }
        }

        let Some(text) = text else {
            debug!(?post_id, "dropping message without recoverable text");
            continue;
        };

        if let Some(post) = Post::new(
            channel,
            author.as_deref(),
            timestamp,
            &settings.zone,
            &text,
            media,
        ) {
            posts.push(post);
        }
    }

    posts
}

/// Midnight of `now`'s calendar day in `offset`, as an absolute instant.
pub fn start_of_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    now.with_timezone(&offset)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Harvest every channel published since the start of today in the display timezone.
pub async fn harvest_all(
    source: &dyn SourceClient,
    channels: &[String],
    settings: &HarvestSettings,
    sink: &dyn ProgressSink,
) -> Result<Vec<Post>, PipelineError> {
    let since = start_of_day(Utc::now(), settings.zone.offset);
    harvest_all_since(source, channels, since, settings, sink).await
}

/// Harvest channels one after the other, pausing between them, and merge the results
/// most recent first. Posts sharing a timestamp keep their channel-list order.
pub async fn harvest_all_since(
    source: &dyn SourceClient,
    channels: &[String],
    since: DateTime<Utc>,
    settings: &HarvestSettings,
    sink: &dyn ProgressSink,
) -> Result<Vec<Post>, PipelineError> {
    if channels.is_empty() {
        return Err(PipelineError::NoChannels);
    }

    info!(
        "ingestion: {} channels ({}), collecting posts since {}",
        channels.len(),
        channels.join(", "),
        settings.zone.format(&since)
    );

    let total = channels.len();
    let mut all_posts: Vec<Post> = Vec::new();

    for (index, channel) in channels.iter().enumerate() {
        sink.emit(ProgressEvent::progress(format!(
            "Parsing channel {}/{}: {}...",
            index + 1,
            total,
            channel
        )));

        let posts = harvest_channel(source, channel, since, settings).await;
        info!("ingestion: collected {} posts from channel {}", posts.len(), channel);
        all_posts.extend(posts);

        if index + 1 < total {
            pause(settings.pacing.channel_delay).await;
        }
    }

    all_posts.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
    info!("ingestion: {} posts collected from {} channels", all_posts.len(), total);

    if all_posts.is_empty() {
        return Err(PipelineError::NoPosts);
    }
    Ok(all_posts)
}
