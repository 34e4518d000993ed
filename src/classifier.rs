//! Recognition of supported post URLs.
//!
//! Every platform owns an ordered list of host-anchored patterns. Each pattern
//! has exactly one capture group that holds the post identifier.

use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use url::Url;

use crate::constants::TRACKING_PARAMS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    TikTok,
    Instagram,
}

impl Platform {
    /// Iteration order, also the tie-break when several platforms match.
    pub const ALL: [Platform; 2] = [Platform::TikTok, Platform::Instagram];

    pub const fn as_str(self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::TikTok => "TikTok",
            Platform::Instagram => "Instagram",
        })
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown platform {s}"))
    }
}

static PATTERNS: LazyLock<[(Platform, Vec<Regex>); 2]> = LazyLock::new(|| {
    let compile = |patterns: &[&str]| {
        patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("invalid builtin url pattern"))
            .collect::<Vec<_>>()
    };
    [
        (
            Platform::TikTok,
            compile(&[
                r"https?://(?:www\.)?tiktok\.com/@[\w.-]+/video/(\d+)",
                r"https?://(?:www\.)?tiktok\.com/t/(\w+)",
                r"https?://vm\.tiktok\.com/(\w+)",
                r"https?://vt\.tiktok\.com/(\w+)",
                r"https?://(?:www\.)?tiktok\.com/@[\w.-]+/photo/(\d+)",
            ]),
        ),
        (
            Platform::Instagram,
            compile(&[
                r"https?://(?:www\.)?instagram\.com/p/([A-Za-z0-9_-]+)",
                r"https?://(?:www\.)?instagram\.com/reels?/([A-Za-z0-9_-]+)",
                r"https?://(?:www\.)?instagram\.com/stories/[\w.-]+/(\d+)",
                r"https?://(?:www\.)?instagram\.com/tv/([A-Za-z0-9_-]+)",
            ]),
        ),
    ]
});

fn patterns_of(platform: Platform) -> &'static [Regex] {
    PATTERNS
        .iter()
        .find(|(p, _)| *p == platform)
        .map(|(_, patterns)| patterns.as_slice())
        .unwrap_or_default()
}

/// A message classified as a fetchable post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub platform: Platform,
    /// Cleaned post URL
    pub url: String,
    pub id: String,
}

pub fn detect_platform(text: &str) -> Option<Platform> {
    PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(text)))
        .map(|(platform, _)| *platform)
}

pub fn extract_identifier(url: &str, platform: Platform) -> Option<String> {
    patterns_of(platform)
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn is_valid(text: &str) -> bool {
    detect_platform(text).is_some()
}

/// Find the first supported URL inside a free-form message.
///
/// The platform is decided first, then the first of its patterns that
/// matches picks both the URL span and the identifier.
pub fn classify(text: &str) -> Option<FetchRequest> {
    let platform = detect_platform(text)?;
    let whole = patterns_of(platform).iter().find_map(|re| re.find(text))?;
    // keep the rest of the token so query parameters survive
    let token_end = text[whole.end()..]
        .find(char::is_whitespace)
        .map_or(text.len(), |offset| whole.end() + offset);
    let raw = text[whole.start()..token_end].trim_end_matches(|c: char| {
        matches!(c, ')' | ']' | '>' | ',' | '.' | '!' | '?' | '"' | '\'')
    });
    let id = extract_identifier(raw, platform)?;
    Some(FetchRequest {
        platform,
        url: clean_url(raw),
        id,
    })
}

/// Strip tracking parameters and the fragment, keeping the remaining
/// parameters in their original order and encoding.
pub fn clean_url(url: &str) -> String {
    let url = url.trim();
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let Some(host) = parsed.host_str() else {
        return url.to_string();
    };

    let mut cleaned = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        cleaned.push_str(&format!(":{port}"));
    }
    cleaned.push_str(parsed.path());

    let kept: Vec<&str> = parsed
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = url::form_urlencoded::parse(pair.as_bytes())
                .next()
                .map(|(key, _)| key.into_owned())
                .unwrap_or_default();
            !TRACKING_PARAMS.contains(&key.as_str())
        })
        .collect();
    if !kept.is_empty() {
        cleaned.push('?');
        cleaned.push_str(&kept.join("&"));
    }
    cleaned
}
