//! Instagram handle extraction and validation.

use regex::Regex;
use std::sync::OnceLock;

const BLOCKED_HANDLES: &[&str] = &[
    "bing",
    "bingmaps",
    "brave",
    "duckduckgo",
    "facebook",
    "google",
    "googleads",
    "instagram",
    "meta",
    "mojeek",
    "searx",
    "swisscows",
    "swisscows.official",
    "threads",
    "tiktok",
    "twitter",
    "whatsapp",
    "youtube",
];

/// First path segments of instagram.com URLs that are not profiles.
const PATH_SEGMENTS: &[&str] = &["p", "reel", "reels", "explore", "accounts", "stories", "tv"];

fn handle_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9._]){0,28}[a-zA-Z0-9]$")
            .expect("handle pattern is valid")
    })
}

fn domain_like() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\.(com|net|org|edu|gov|br|pt|io|co|info|biz)(\.[a-z]{2})?$")
            .expect("domain pattern is valid")
    })
}

fn mention_patterns() -> &'static [Regex; 3] {
    static RE: OnceLock<[Regex; 3]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"instagram\.com/([a-zA-Z0-9._]{1,30})").expect("url pattern is valid"),
            Regex::new(r"instagr\.am/([a-zA-Z0-9._]{1,30})").expect("short url pattern is valid"),
            Regex::new(r"@([a-zA-Z0-9._]{1,30})").expect("mention pattern is valid"),
        ]
    })
}

fn followers_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d[\d.,]*\s?[kmb]?)\s*(?:seguidores|followers)")
            .expect("followers pattern is valid")
    })
}

pub fn is_valid_handle(handle: &str) -> bool {
    let lower = handle.to_lowercase();
    !BLOCKED_HANDLES.contains(&lower.as_str())
        && !PATH_SEGMENTS.contains(&lower.as_str())
        && !domain_like().is_match(handle)
        && handle_shape().is_match(handle)
}

/// Strips `@`, URL prefixes, query string and trailing slash. `None` when the rest is not a handle.
pub fn normalize_handle(raw: &str) -> Option<String> {
    let mut handle = raw.trim().trim_start_matches('@');
    for prefix in ["https://", "http://", "www.", "instagram.com/", "instagr.am/"] {
        handle = handle.strip_prefix(prefix).unwrap_or(handle);
    }
    let handle = handle
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    is_valid_handle(handle).then(|| handle.to_string())
}

/// First valid handle mentioned in free text. Profile URLs win over bare `@mentions`.
pub fn extract_handle(text: &str) -> Option<String> {
    mention_patterns()
        .iter()
        .flat_map(|re| re.captures_iter(text))
        .filter_map(|caps| caps.get(1))
        .find_map(|m| normalize_handle(m.as_str()))
}

/// Follower count as written in the text, e.g. "1.234" or "12,5K".
pub fn extract_followers(text: &str) -> Option<String> {
    followers_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<String>().to_uppercase())
}
