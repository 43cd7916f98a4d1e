use reqwest::Url;
use scraper::Html;
use serde_json::Value;

/// Metadata keys that carry a publication timestamp, in order of preference.
const PUBLISHED_AT_KEYS: [&str; 7] = [
    "article:published_time",
    "og:published_time",
    "datepublished",
    "publishdate",
    "pubdate",
    "date",
    "article:modified_time",
];

/// Extracts the host from a URL with any leading `www.` removed.
///
/// Returns an empty string when the input is not an absolute URL.
pub fn extract_domain(url: &str) -> String {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|host| host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
        .unwrap_or_default()
}

/// Reduces a search title or snippet to plain text.
///
/// Tags are dropped, entities decoded and whitespace collapsed.
pub fn clean_html_text(text: &str) -> String {
    if !text.contains('<') && !text.contains('&') {
        return collapse_whitespace(text);
    }

    let fragment = Html::parse_fragment(text);
    let plain = fragment.root_element().text().collect::<String>();
    collapse_whitespace(&plain)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Finds a publication timestamp in a search result's `pagemap` block.
pub fn published_at_from_pagemap(pagemap: Option<&Value>) -> Option<String> {
    let metatags = pagemap?.get("metatags")?.as_array()?;

    for key in PUBLISHED_AT_KEYS {
        let found = metatags
            .iter()
            .filter_map(|tags| tags.get(key))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|v| !v.is_empty());
        if let Some(value) = found {
            return Some(value.to_string());
        }
    }

    None
}
