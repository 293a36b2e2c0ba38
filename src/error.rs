//! Error kinds surfaced at the library boundary.

use thiserror::Error;

/// Hints shown next to a failed download.
pub const DOWNLOAD_TROUBLESHOOTING: &[&str] = &[
    "Try a different video quality",
    "Check if the video is available in your region",
    "Try again in a few minutes",
    "Use MP3 format for audio-only downloads",
    "The video might be age-restricted or private",
];

#[derive(Debug, Error)]
pub enum GrabError {
    #[error("unsupported platform for URL: {url}")]
    UnsupportedPlatform { url: String },

    #[error("failed to get video information: {0}")]
    ProbeFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("thumbnail unavailable")]
    ThumbnailUnavailable,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),
}

impl GrabError {
    /// Short machine-readable tag for API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            GrabError::UnsupportedPlatform { .. } => "unsupported_platform",
            GrabError::ProbeFailed(_) => "probe_failed",
            GrabError::DownloadFailed(_) => "download_failed",
            GrabError::ThumbnailUnavailable => "thumbnail_unavailable",
            GrabError::InvalidInput(_) => "invalid_input",
            GrabError::NotFound(_) => "not_found",
            GrabError::Filesystem(_) => "filesystem",
        }
    }

    pub fn troubleshooting(&self) -> &'static [&'static str] {
        match self {
            GrabError::DownloadFailed(_) => DOWNLOAD_TROUBLESHOOTING,
            _ => &[],
        }
    }
}
