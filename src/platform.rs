//! Maps a URL to the site it belongs to.
//!
//! Matching is a substring scan over the lowercased host so that country-code
//! subdomains (`m.youtube.com`, `www.tiktok.com`) and short-link aliases
//! (`youtu.be`, `fb.watch`) resolve without enumerating every host.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    YouTube,
    Instagram,
    Facebook,
    TikTok,
    Twitter,
    Twitch,
    Vimeo,
    Dailymotion,
    Pinterest,
    Reddit,
    Likee,
    Unknown,
}

/// Scanned in order; the first substring found in the host wins.
const HOST_TABLE: &[(&str, Platform)] = &[
    ("youtube", Platform::YouTube),
    ("youtu.be", Platform::YouTube),
    ("instagram", Platform::Instagram),
    ("facebook", Platform::Facebook),
    ("fb", Platform::Facebook),
    ("tiktok", Platform::TikTok),
    ("twitter", Platform::Twitter),
    ("x.com", Platform::Twitter),
    ("twitch", Platform::Twitch),
    ("vimeo", Platform::Vimeo),
    ("dailymotion", Platform::Dailymotion),
    ("pinterest", Platform::Pinterest),
    ("reddit", Platform::Reddit),
    ("likee", Platform::Likee),
];

impl Platform {
    pub fn label(self) -> &'static str {
        match self {
            Platform::YouTube => "YouTube",
            Platform::Instagram => "Instagram",
            Platform::Facebook => "Facebook",
            Platform::TikTok => "TikTok",
            Platform::Twitter => "Twitter",
            Platform::Twitch => "Twitch",
            Platform::Vimeo => "Vimeo",
            Platform::Dailymotion => "Dailymotion",
            Platform::Pinterest => "Pinterest",
            Platform::Reddit => "Reddit",
            Platform::Likee => "Likee",
            Platform::Unknown => "Unknown",
        }
    }

    pub fn is_supported(self) -> bool {
        self != Platform::Unknown
    }

    /// Labels of every recognised site, deduplicated, in table order.
    pub fn supported() -> Vec<Platform> {
        let mut seen = Vec::new();
        for (_, platform) in HOST_TABLE {
            if !seen.contains(platform) {
                seen.push(*platform);
            }
        }
        seen
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifies `url` by its host. Never fails: anything unparsable, hostless
/// or unrecognised is `Platform::Unknown`.
pub fn classify(url: &str) -> Platform {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return Platform::Unknown;
    };
    let Some(host) = parsed.host_str() else {
        return Platform::Unknown;
    };
    let host = host.to_ascii_lowercase();
    HOST_TABLE
        .iter()
        .find(|(needle, _)| host.contains(needle))
        .map(|(_, platform)| *platform)
        .unwrap_or(Platform::Unknown)
}
