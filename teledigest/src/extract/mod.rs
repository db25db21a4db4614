//! HTML extraction for channel preview pages.
//!
//! The same rules apply to a listing page entry and to a standalone single-post page: pick the
//! message's own text block (never the quoted one it replies to) and gather its media.

pub mod dom;
pub mod media;
pub mod url;

use once_cell::sync::Lazy;
use regex::Regex;

use dom::{find_all, DomElement};

pub use media::{extract_media, MediaSet};
pub use url::normalize_https;

pub(crate) const TEXT_CLASS: &str = "tgme_widget_message_text";
pub(crate) const MAIN_TEXT_CLASSES: &[&str] = &[TEXT_CLASS, "js-message_text"];
const REPLY_TEXT_CLASS: &str = "js-message_reply_text";
const REPLY_CLASS: &str = "tgme_widget_message_reply";

static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("static blank line pattern"));

/// Quoted message blocks embedded in a reply.
pub(crate) fn is_reply_block<E: DomElement>(el: &E) -> bool {
    el.has_class(REPLY_CLASS) || el.has_class(REPLY_TEXT_CLASS)
}

/// Locate the element holding the message's own text under `root`.
///
/// The last element carrying the full main-text class pair wins: when a listing repeats a
/// quoted message next to its reply, the reply comes last. Without such an element, generic
/// text blocks are scanned from the end and the first one that is not a quoted reply is
/// returned. `None` means the page has no inline text.
pub fn select_main_text<E: DomElement>(root: E) -> Option<E> {
    if let Some(last) = find_all(root, |e| e.has_classes(MAIN_TEXT_CLASSES)).pop() {
        return Some(last);
    }
    find_all(root, |e| e.has_class(TEXT_CLASS))
        .into_iter()
        .rev()
        .find(|e| !e.has_class(REPLY_TEXT_CLASS))
}

/// Trim and collapse every run of blank lines into a single newline.
pub fn clean_text(raw: &str) -> String {
    BLANK_LINES.replace_all(raw.trim(), "\n").into_owned()
}

/// Cleaned main text under `root`; `None` when absent or empty after cleaning.
pub fn extract_text<E: DomElement>(root: E) -> Option<String> {
    select_main_text(root)
        .map(|el| clean_text(&el.text_content()))
        .filter(|text| !text.is_empty())
}
