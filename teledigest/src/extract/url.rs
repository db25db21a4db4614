use once_cell::sync::Lazy;
use regex::Regex;

static STYLE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\((?:'|")?(.*?)(?:'|")?\)"#).expect("static style url pattern")
});

static DECORATIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"emoji|userpic|avatar|svg").expect("static decorative pattern"));

/// Rewrite a media URL to the secure scheme.
///
/// `//host/path` gains `https:`, `http://` becomes `https://`; anything else is returned
/// unchanged. Empty input yields an empty string, which callers treat as "no URL".
pub fn normalize_https(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    if let Some(rest) = url.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    if let Some(rest) = url.strip_prefix("http://") {
        return format!("https://{}", rest);
    }
    url.to_string()
}

/// URLs referenced through `url(...)` in an inline style attribute, in order of appearance.
pub fn urls_from_style(style: &str) -> Vec<String> {
    STYLE_URL
        .captures_iter(style)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|u| !u.is_empty())
        .collect()
}

/// Emoji sprites, profile pictures and vector decorations.
pub fn is_decorative(url: &str) -> bool {
    DECORATIVE.is_match(url)
}
