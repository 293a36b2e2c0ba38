//! Turns a (quality, container) choice into a yt-dlp format selector.
//!
//! Every video chain ends in a bare `best`, so for any URL the extractor can
//! resolve at all there is at least one stream the selector matches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bitrate requested from the audio extraction post-processor, in kbit/s.
pub const AUDIO_BITRATE_KBPS: u32 = 192;

/// Deserializes through [`FromStr`], so request labels are case-insensitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Quality {
    #[default]
    Best,
    #[serde(rename = "4K")]
    Uhd4k,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "360p")]
    P360,
}

impl Quality {
    pub const ALL: [Quality; 6] = [
        Quality::Best,
        Quality::Uhd4k,
        Quality::P1080,
        Quality::P720,
        Quality::P480,
        Quality::P360,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Quality::Best => "Best",
            Quality::Uhd4k => "4K",
            Quality::P1080 => "1080p",
            Quality::P720 => "720p",
            Quality::P480 => "480p",
            Quality::P360 => "360p",
        }
    }

    /// Maximum frame height, `None` for uncapped.
    pub fn height_cap(self) -> Option<u32> {
        match self {
            Quality::Best => None,
            Quality::Uhd4k => Some(2160),
            Quality::P1080 => Some(1080),
            Quality::P720 => Some(720),
            Quality::P480 => Some(480),
            Quality::P360 => Some(360),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Container {
    #[default]
    Mp4,
    Webm,
    Mp3,
    M4a,
    Avi,
    Mov,
}

impl Container {
    pub const ALL: [Container; 6] = [
        Container::Mp4,
        Container::Webm,
        Container::Mp3,
        Container::M4a,
        Container::Avi,
        Container::Mov,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Container::Mp4 => "MP4",
            Container::Webm => "WEBM",
            Container::Mp3 => "MP3",
            Container::M4a => "M4A",
            Container::Avi => "AVI",
            Container::Mov => "MOV",
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(self, Container::Mp3 | Container::M4a)
    }

    /// Lowercased label, which doubles as the file extension and the ffmpeg
    /// codec name for the audio containers.
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
            Container::Mp3 => "mp3",
            Container::M4a => "m4a",
            Container::Avi => "avi",
            Container::Mov => "mov",
        }
    }
}

macro_rules! label_parsing {
    ($ty:ty, $what:literal) => {
        impl FromStr for $ty {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let wanted = value.trim();
                Self::ALL
                    .into_iter()
                    .find(|candidate| candidate.label().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| format!("unknown {}: {value}", $what))
            }
        }

        impl TryFrom<String> for $ty {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

label_parsing!(Quality, "quality");
label_parsing!(Container, "container");

/// `FFmpegExtractAudio` step applied after the download.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioExtraction {
    pub codec: String,
    pub bitrate: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPlan {
    pub format_expr: String,
    pub postproc: Option<AudioExtraction>,
}

/// Builds the selector for a download. `subtitles` does not influence the
/// selector; subtitle flags are attached by the downloader.
pub fn plan(quality: Quality, container: Container, _subtitles: bool) -> FormatPlan {
    if container.is_audio() {
        return FormatPlan {
            format_expr: "bestaudio/best".to_string(),
            postproc: Some(AudioExtraction {
                codec: container.extension().to_string(),
                bitrate: AUDIO_BITRATE_KBPS,
            }),
        };
    }

    // WEBM/AVI/MOV share the MP4-preferring chain; no transcoding is requested.
    let format_expr = match quality.height_cap() {
        None => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
        Some(cap) => format!(
            "bestvideo[height<={cap}][ext=mp4]+bestaudio[ext=m4a]/best[height<={cap}]/best"
        ),
    };
    FormatPlan {
        format_expr,
        postproc: None,
    }
}

/// Selector used by the fallback attempt after the planned one failed.
pub fn fallback_format(container: Container) -> &'static str {
    if container.is_audio() {
        "bestaudio/best"
    } else {
        "best"
    }
}
