use scraper::Html;
use tracing::{info, warn};

use crate::extract::dom::{find_first, DomElement};
use crate::extract::{extract_media, extract_text, MediaSet};
use crate::fetch::{PageFetch, SourceClient};

/// What a standalone post page yielded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinglePost {
    pub text: Option<String>,
    pub media: MediaSet,
}

/// Fetches the single-post view of `post_id` and extracts its text and media.
///
/// Used when a listing entry carries no inline text. A failed fetch returns an empty
/// [`SinglePost`] after logging; one unreachable post must not abort a channel harvest.
pub async fn fetch_single_post(source: &dyn SourceClient, post_id: &str) -> SinglePost {
    info!("scraping: loading single post {}", post_id);
    match source.single_post_page(post_id).await {
        PageFetch::Loaded(html) => {
            let post = parse_single_post(&html);
            if post.text.is_none() {
                warn!("scraping: single post {} has no text either", post_id);
            }
            post
        }
        PageFetch::Unavailable { reason } => {
            warn!("scraping: single post {} unavailable: {}", post_id, reason);
            SinglePost::default()
        }
    }
}

/// Extract a single-post page, scoped to its `<body>`.
pub fn parse_single_post(html: &str) -> SinglePost {
    let document = Html::parse_document(html);
    let root = document.root_element();
    let body = find_first(root, |e| e.tag_name() == "body").unwrap_or(root);

    SinglePost {
        text: extract_text(body),
        media: extract_media(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_PAGE: &str = r#"<!DOCTYPE html><html><head><title>post</title></head><body>
        <div class="tgme_widget_message" data-post="chan/123">
          <div class="tgme_widget_message_bubble">
            <a class="tgme_widget_message_photo_wrap" style="background-image:url('//cdn/full.jpg')"></a>
            <div class="tgme_widget_message_text js-message_text">Full<br><br>text</div>
          </div>
        </div>
      </body></html>"#;

    #[test]
    fn parses_text_and_media_from_body() {
        let post = parse_single_post(SINGLE_PAGE);
        assert_eq!(post.text.as_deref(), Some("Full\ntext"));
        assert_eq!(post.media.images, vec!["https://cdn/full.jpg"]);
    }

    #[test]
    fn page_without_text_yields_none() {
        let post = parse_single_post("<html><body><p>Post not found</p></body></html>");
        assert_eq!(post, SinglePost::default());
    }
}
