//! Boundary to the third-party media extractor (yt-dlp).
//!
//! Options are a typed record whose serde names are the extractor's own option
//! keys; [`ExtractorOptions::to_args`] turns them into command-line flags when a
//! process is spawned. Everything else in the crate talks to the [`Extractor`]
//! trait so tests can swap the process for an in-memory fake.

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::planner::AudioExtraction;

/// Longest title (in bytes) that ends up in an output filename.
pub const MAX_TITLE_BYTES: usize = 120;

/// Post-processing steps understood by the extractor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "key")]
pub enum PostProcessor {
    #[serde(rename = "FFmpegExtractAudio")]
    ExtractAudio {
        #[serde(rename = "preferredcodec")]
        codec: String,
        #[serde(rename = "preferredquality")]
        bitrate: u32,
    },
}

impl From<&AudioExtraction> for PostProcessor {
    fn from(value: &AudioExtraction) -> Self {
        PostProcessor::ExtractAudio {
            codec: value.codec.clone(),
            bitrate: value.bitrate,
        }
    }
}

/// The option set handed to one extractor invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outtmpl: Option<String>,
    #[serde(rename = "writesubtitles")]
    pub write_subtitles: bool,
    #[serde(rename = "subtitleslangs")]
    pub subtitle_langs: Vec<String>,
    pub postprocessors: Vec<PostProcessor>,
    #[serde(rename = "noplaylist")]
    pub no_playlist: bool,
    #[serde(rename = "continuedl")]
    pub continue_dl: bool,
    #[serde(rename = "ignoreerrors")]
    pub ignore_errors: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragment_retries: Option<u32>,
    pub skip_unavailable_fragments: bool,
    pub http_headers: BTreeMap<String, String>,
    pub quiet: bool,
    pub no_warnings: bool,
    pub extract_flat: bool,
}

impl ExtractorOptions {
    /// Options for resolving metadata without touching media bytes.
    pub fn probe() -> Self {
        Self {
            quiet: true,
            no_warnings: true,
            extract_flat: false,
            ..Self::default()
        }
    }

    /// Returns the planned audio extension, if audio extraction is requested.
    pub fn audio_extension(&self) -> Option<&str> {
        self.postprocessors.iter().find_map(|step| match step {
            PostProcessor::ExtractAudio { codec, .. } => Some(codec.as_str()),
        })
    }

    /// Serializes the record into yt-dlp command-line flags.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(format) = &self.format {
            args.push("--format".to_string());
            args.push(format.clone());
        }
        if let Some(template) = &self.outtmpl {
            args.push("--output".to_string());
            args.push(template.clone());
        }
        if self.write_subtitles {
            args.push("--write-subs".to_string());
            if !self.subtitle_langs.is_empty() {
                args.push("--sub-langs".to_string());
                args.push(self.subtitle_langs.join(","));
            }
        }
        for step in &self.postprocessors {
            match step {
                PostProcessor::ExtractAudio { codec, bitrate } => {
                    args.push("--extract-audio".to_string());
                    args.push("--audio-format".to_string());
                    args.push(codec.clone());
                    args.push("--audio-quality".to_string());
                    args.push(format!("{bitrate}K"));
                }
            }
        }
        if self.no_playlist {
            args.push("--no-playlist".to_string());
        }
        if self.continue_dl {
            args.push("--continue".to_string());
        }
        if self.ignore_errors {
            args.push("--ignore-errors".to_string());
        }
        if let Some(retries) = self.retries {
            args.push("--retries".to_string());
            args.push(retries.to_string());
        }
        if let Some(retries) = self.fragment_retries {
            args.push("--fragment-retries".to_string());
            args.push(retries.to_string());
        }
        if self.skip_unavailable_fragments {
            args.push("--skip-unavailable-fragments".to_string());
        }
        for (name, value) in &self.http_headers {
            args.push("--add-header".to_string());
            args.push(format!("{name}:{value}"));
        }
        if self.quiet {
            args.push("--quiet".to_string());
        }
        if self.no_warnings {
            args.push("--no-warnings".to_string());
        }
        if self.extract_flat {
            args.push("--flat-playlist".to_string());
        }
        args
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    pub format_note: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestedDownload {
    pub filepath: Option<String>,
    pub ext: Option<String>,
}

/// The subset of the extractor's info dictionary this crate reads. Everything
/// is optional because sites disagree wildly on what they expose.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub thumbnail: Option<String>,
    pub ext: Option<String>,
    pub webpage_url: Option<String>,
    pub extractor_key: Option<String>,
    pub uploader: Option<String>,
    #[serde(default, deserialize_with = "lenient_formats")]
    pub formats: Option<Vec<FormatInfo>>,
    pub requested_downloads: Option<Vec<RequestedDownload>>,
    pub filename: Option<String>,
    #[serde(rename = "_filename")]
    pub legacy_filename: Option<String>,
}

/// Keeps the format entries that fit [`FormatInfo`] and drops the rest, so an
/// odd field in one entry never fails a download that already happened.
fn lenient_formats<'de, D>(deserializer: D) -> Result<Option<Vec<FormatInfo>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let Some(serde_json::Value::Array(entries)) = raw else {
        return Ok(None);
    };
    Ok(Some(
        entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect(),
    ))
}

impl MediaInfo {
    pub fn title_or(&self, fallback: &str) -> String {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

pub trait Extractor: Send + Sync {
    /// Resolves `url` to its info dictionary, fetching media when `download`
    /// is set.
    fn extract_info(
        &self,
        url: &str,
        options: &ExtractorOptions,
        download: bool,
    ) -> Result<MediaInfo>;

    /// Path the download would (or did) produce for `info`.
    fn prepare_filename(&self, info: &MediaInfo, options: &ExtractorOptions) -> PathBuf {
        let reported = info
            .requested_downloads
            .iter()
            .flatten()
            .filter_map(|download| download.filepath.as_deref())
            .chain(info.filename.as_deref())
            .chain(info.legacy_filename.as_deref())
            .find(|path| !path.trim().is_empty());
        if let Some(path) = reported {
            return PathBuf::from(path);
        }

        let template = options.outtmpl.as_deref().unwrap_or("%(title)s.%(ext)s");
        let title = info.title_or("video");
        let ext = info.ext.as_deref().unwrap_or("mp4");
        PathBuf::from(render_output_template(template, &title, ext))
    }
}

/// Runs the `yt-dlp` executable and parses its single-JSON dump.
#[derive(Clone, Debug)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, url: &str, options: &ExtractorOptions, download: bool) -> Command {
        let mut command = Command::new(&self.program);
        command.args(options.to_args());
        if download {
            command.arg("--no-simulate");
        } else {
            command.arg("--skip-download");
        }
        command
            .arg("--dump-single-json")
            .arg("--no-progress")
            .arg("--")
            .arg(url);
        command
    }
}

impl Extractor for YtDlp {
    fn extract_info(
        &self,
        url: &str,
        options: &ExtractorOptions,
        download: bool,
    ) -> Result<MediaInfo> {
        let output = self
            .command(url, options, download)
            .output()
            .with_context(|| format!("launching {}", self.program.display()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            bail!(
                "{}",
                last_error_line(&stderr)
                    .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status))
            );
        }

        let stdout = String::from_utf8(output.stdout).context("yt-dlp output is not UTF-8")?;
        let payload = stdout.trim();
        if payload.is_empty() || payload == "null" {
            return Err(anyhow!(
                "{}",
                last_error_line(&stderr).unwrap_or_else(|| format!("no media found at {url}"))
            ));
        }
        serde_json::from_str(payload).context("parsing yt-dlp JSON")
    }
}

/// Picks the most useful line out of yt-dlp's stderr: the last `ERROR:` line,
/// or failing that the last non-empty one.
fn last_error_line(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|line| line.to_string())
}

/// Makes `title` safe to use as a single path component and caps it at
/// `max_bytes` without splitting a character.
pub fn sanitize_title(title: &str, max_bytes: usize) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let mut cleaned = cleaned
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();
    if cleaned.len() > max_bytes {
        let mut cut = max_bytes;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        cleaned.truncate(cut);
        cleaned = cleaned.trim_end().to_string();
    }
    if cleaned.is_empty() {
        "video".to_string()
    } else {
        cleaned
    }
}

/// Renders the subset of the output-template grammar this crate emits:
/// `%(title)s`, `%(title).<N>B` and `%(ext)s`.
pub fn render_output_template(template: &str, title: &str, ext: &str) -> String {
    let mut rendered = String::with_capacity(template.len() + title.len());
    let mut rest = template;
    while let Some(start) = rest.find("%(") {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(close) = after.find(')') else {
            rendered.push_str(&rest[start..]);
            return rendered;
        };
        let field = &after[..close];
        let conversion = &after[close + 1..];
        // conversion: `s`, or `.<digits>B` for a byte-capped field
        let (max_bytes, consumed) = if let Some(stripped) = conversion.strip_prefix('.') {
            let digits: String = stripped.chars().take_while(char::is_ascii_digit).collect();
            if !digits.is_empty() && stripped[digits.len()..].starts_with('B') {
                (digits.parse::<usize>().ok(), 1 + digits.len() + 1)
            } else {
                (None, 0)
            }
        } else if conversion.starts_with('s') {
            (None, 1)
        } else {
            (None, 0)
        };
        let value = match field {
            "title" => sanitize_title(title, max_bytes.unwrap_or(usize::MAX)),
            "ext" => ext.to_string(),
            other => other.to_string(),
        };
        rendered.push_str(&value);
        rest = &conversion[consumed..];
    }
    rendered.push_str(rest);
    rendered
}
