//! Resolves a URL to descriptive metadata without fetching media bytes.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::extractor::{Extractor, ExtractorOptions, FormatInfo, MediaInfo};
use crate::platform::{Platform, classify};

/// What the preview card shows before the user confirms a download.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub title: String,
    /// Whole seconds; zero when the site does not report a duration.
    pub duration: u64,
    pub view_count: u64,
    pub thumbnail: Option<String>,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<FormatInfo>,
}

impl ProbeResult {
    fn from_info(info: MediaInfo, platform: Platform) -> Self {
        Self {
            title: info.title_or("Unknown Title"),
            duration: info.duration.map(|secs| secs.max(0.0).round() as u64).unwrap_or(0),
            view_count: info.view_count.unwrap_or(0),
            thumbnail: info.thumbnail.filter(|url| !url.trim().is_empty()),
            platform,
            formats: info.formats.unwrap_or_default(),
        }
    }

    /// `"2m 5s"`, the way the preview card prints durations.
    pub fn duration_text(&self) -> String {
        format!("{}m {}s", self.duration / 60, self.duration % 60)
    }
}

/// Asks the extractor for metadata. Failures are logged and collapse to
/// `None`; the probe never retries.
pub fn probe(extractor: &dyn Extractor, url: &str) -> Option<ProbeResult> {
    match extractor.extract_info(url, &ExtractorOptions::probe(), false) {
        Ok(info) => Some(ProbeResult::from_info(info, classify(url))),
        Err(err) => {
            error!(url, "error getting video info: {err:#}");
            None
        }
    }
}
