use serde::Serialize;

use super::dom::{find_all, walk, DomElement};
use super::url::{is_decorative, normalize_https, urls_from_style};
use super::{is_reply_block, MAIN_TEXT_CLASSES};

/// Blocks of a message that may carry media, as class combinations.
const MEDIA_CONTAINERS: &[&[&str]] = &[
    MAIN_TEXT_CLASSES,
    &["media_supported_cont"],
    &["tgme_widget_message_grouped_wrap"],
    &["tgme_widget_message_video_player"],
    &["tgme_widget_message_photo_wrap"],
];

/// Image and video URLs in order of discovery, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaSet {
    pub images: Vec<String>,
    pub videos: Vec<String>,
}

impl MediaSet {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty()
    }

    /// Normalize and record an image URL. Empty results are ignored.
    pub fn add_image(&mut self, url: &str) {
        push_unique(&mut self.images, normalize_https(url));
    }

    pub fn add_video(&mut self, url: &str) {
        push_unique(&mut self.videos, normalize_https(url));
    }
}

fn push_unique(list: &mut Vec<String>, url: String) {
    if !url.is_empty() && !list.contains(&url) {
        list.push(url);
    }
}

/// Collect the media of a message (or of a whole single-post page).
///
/// Every media container under `root` is scanned including the container element itself.
/// Reply and quote subtrees are skipped so a quoted post's pictures are not attributed to the
/// reply. Within a container, `img` sources come first, then style `url(...)` images, then
/// videos. Containers may overlap; the set absorbs the repeats.
pub fn extract_media<E: DomElement>(root: E) -> MediaSet {
    let mut media = MediaSet::default();
    for classes in MEDIA_CONTAINERS {
        for container in find_all(root, |e| e.has_classes(classes)) {
            let mut nodes = Vec::new();
            walk(container, &|e: &E| is_reply_block(e), &mut |el: E| nodes.push(el));
            collect_from(&nodes, &mut media);
        }
    }
    media
}

fn collect_from<E: DomElement>(nodes: &[E], media: &mut MediaSet) {
    for el in nodes.iter().filter(|el| el.tag_name() == "img") {
        if let Some(src) = el.attr("src") {
            if !is_decorative(src) {
                media.add_image(src);
            }
        }
    }

    for el in nodes {
        let Some(style) = el.attr("style") else {
            continue;
        };
        for url in urls_from_style(style) {
            if !is_decorative(&url) {
                media.add_image(&url);
            }
        }
    }

    for el in nodes.iter().filter(|el| el.tag_name() == "video") {
        if let Some(src) = el.attr("src") {
            media.add_video(src);
        }
        for source in el.child_elements() {
            if source.tag_name() == "source" {
                if let Some(src) = source.attr("src") {
                    media.add_video(src);
                }
            }
        }
    }
}
