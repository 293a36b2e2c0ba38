//! Executes a planned download through the extractor.
//!
//! One invocation runs with the full option set. If it raises, a second one
//! runs with a minimal configuration: plain `best`/`bestaudio/best`, no custom
//! headers, no retry tuning, audio extraction kept only when audio was asked
//! for. Only when both raise is [`GrabError::DownloadFailed`] surfaced.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GrabError;
use crate::extractor::{Extractor, ExtractorOptions, MAX_TITLE_BYTES, MediaInfo, PostProcessor};
use crate::planner::{Container, FormatPlan, Quality, fallback_format, plan};
use crate::platform::{Platform, classify};

pub const DOWNLOAD_RETRIES: u32 = 10;
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Everything the user confirmed for one download.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub container: Container,
    #[serde(default)]
    pub subtitles: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, quality: Quality, container: Container) -> Self {
        Self {
            url: url.into(),
            quality,
            container,
            subtitles: false,
            private: false,
            passphrase: None,
        }
    }

    /// Passphrase to file the result under, if the request is private and
    /// actually carries one.
    pub fn private_passphrase(&self) -> Option<&str> {
        if !self.private {
            return None;
        }
        self.passphrase
            .as_deref()
            .filter(|passphrase| !passphrase.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub title: String,
    pub platform: Platform,
    /// True when the minimal fallback configuration produced the file.
    pub used_fallback: bool,
    #[serde(skip)]
    pub info: MediaInfo,
}

/// Stateless between calls; cloning shares the extractor.
#[derive(Clone)]
pub struct Downloader {
    extractor: Arc<dyn Extractor>,
    downloads_dir: PathBuf,
}

impl Downloader {
    pub fn new(extractor: Arc<dyn Extractor>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            extractor,
            downloads_dir: downloads_dir.into(),
        }
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub fn output_template(&self) -> String {
        self.downloads_dir
            .join(format!("%(title).{MAX_TITLE_BYTES}B.%(ext)s"))
            .to_string_lossy()
            .into_owned()
    }

    /// Screens the URL, then downloads with one degraded retry. Unsupported
    /// URLs never reach the extractor.
    pub fn download(&self, request: &DownloadRequest) -> Result<DownloadOutcome, GrabError> {
        let platform = classify(&request.url);
        if !platform.is_supported() {
            return Err(GrabError::UnsupportedPlatform {
                url: request.url.clone(),
            });
        }

        let plan = plan(request.quality, request.container, request.subtitles);
        let primary = self.primary_options(request, &plan);
        let (path, info, used_fallback) = match self.attempt(&request.url, &primary) {
            Ok((path, info)) => (path, info, false),
            Err(err) => {
                warn!(url = %request.url, "download error, retrying with minimal options: {err:#}");
                let fallback = self.fallback_options(request.container, &plan);
                let (path, info) = self
                    .attempt(&request.url, &fallback)
                    .map_err(|err| GrabError::DownloadFailed(format!("{err:#}")))?;
                (path, info, true)
            }
        };

        let title = info.title_or("video");
        info!(url = %request.url, path = %path.display(), used_fallback, "download completed");
        Ok(DownloadOutcome {
            path,
            title,
            platform,
            used_fallback,
            info,
        })
    }

    fn attempt(&self, url: &str, options: &ExtractorOptions) -> Result<(PathBuf, MediaInfo)> {
        let info = self.extractor.extract_info(url, options, true)?;
        let mut path = self.extractor.prepare_filename(&info, options);
        // The predicted name carries the source container; extraction renames
        // the file in place afterwards.
        if let Some(ext) = options.audio_extension() {
            path.set_extension(ext);
        }
        if !path.is_file() {
            bail!("extractor finished but {} does not exist", path.display());
        }
        Ok((path, info))
    }

    pub fn primary_options(&self, request: &DownloadRequest, plan: &FormatPlan) -> ExtractorOptions {
        let mut http_headers = BTreeMap::new();
        http_headers.insert("User-Agent".to_string(), BROWSER_USER_AGENT.to_string());
        http_headers.insert("Accept-Language".to_string(), "en".to_string());

        ExtractorOptions {
            format: Some(plan.format_expr.clone()),
            outtmpl: Some(self.output_template()),
            write_subtitles: request.subtitles,
            subtitle_langs: vec!["en".to_string()],
            postprocessors: plan.postproc.iter().map(PostProcessor::from).collect(),
            no_playlist: true,
            continue_dl: true,
            ignore_errors: true,
            retries: Some(DOWNLOAD_RETRIES),
            fragment_retries: Some(DOWNLOAD_RETRIES),
            skip_unavailable_fragments: true,
            http_headers,
            quiet: false,
            no_warnings: false,
            extract_flat: false,
        }
    }

    pub fn fallback_options(&self, container: Container, plan: &FormatPlan) -> ExtractorOptions {
        ExtractorOptions {
            format: Some(fallback_format(container).to_string()),
            outtmpl: Some(self.output_template()),
            postprocessors: plan.postproc.iter().map(PostProcessor::from).collect(),
            no_playlist: true,
            ignore_errors: true,
            ..ExtractorOptions::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::fs;
    use tempfile::tempdir;

    /// How a fake invocation behaves.
    #[derive(Clone, Debug)]
    pub(crate) enum Step {
        /// Writes `<title>.<ext>` into the output directory and reports it.
        Produce { title: String, ext: String },
        /// Reports success without writing anything.
        Phantom,
        Fail(String),
    }

    /// In-memory extractor that plays back scripted steps and records every
    /// call it receives.
    #[derive(Default)]
    pub(crate) struct FakeExtractor {
        steps: Mutex<VecDeque<Step>>,
        pub calls: Mutex<Vec<(String, ExtractorOptions, bool)>>,
    }

    impl FakeExtractor {
        pub(crate) fn with_steps(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn produce(title: &str, ext: &str) -> Step {
            Step::Produce {
                title: title.to_string(),
                ext: ext.to_string(),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl Extractor for FakeExtractor {
        fn extract_info(
            &self,
            url: &str,
            options: &ExtractorOptions,
            download: bool,
        ) -> Result<MediaInfo> {
            self.calls
                .lock()
                .push((url.to_string(), options.clone(), download));
            let step = self
                .steps
                .lock()
                .pop_front()
                .unwrap_or_else(|| FakeExtractor::produce("Default Clip", "mp4"));
            match step {
                Step::Produce { title, ext } => {
                    let template = options.outtmpl.clone().unwrap_or_default();
                    let target = crate::extractor::render_output_template(&template, &title, &ext);
                    let target = match options.audio_extension() {
                        Some(audio) => Path::new(&target).with_extension(audio),
                        None => PathBuf::from(target),
                    };
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&target, b"media")?;
                    Ok(MediaInfo {
                        title: Some(title),
                        ext: Some(ext),
                        ..MediaInfo::default()
                    })
                }
                Step::Phantom => Ok(MediaInfo {
                    title: Some("Ghost".into()),
                    ext: Some("mp4".into()),
                    ..MediaInfo::default()
                }),
                Step::Fail(message) => bail!("{message}"),
            }
        }
    }

    #[test]
    fn youtube_720p_mp4_downloads_with_full_options() {
        let dir = tempdir().unwrap();
        let fake = FakeExtractor::with_steps(vec![FakeExtractor::produce("My Clip", "mp4")]);
        let downloader = Downloader::new(fake.clone(), dir.path());
        let request = DownloadRequest::new(
            "https://www.youtube.com/watch?v=abcdEFGH123",
            Quality::P720,
            Container::Mp4,
        );

        let outcome = downloader.download(&request).unwrap();
        assert_eq!(outcome.platform, Platform::YouTube);
        assert_eq!(outcome.title, "My Clip");
        assert!(outcome.path.to_string_lossy().ends_with(".mp4"));
        assert!(outcome.path.is_file());
        assert!(!outcome.used_fallback);

        let calls = fake.calls.lock();
        assert_eq!(calls.len(), 1);
        let (_, options, download) = &calls[0];
        assert!(download);
        assert_eq!(
            options.format.as_deref(),
            Some("bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[height<=720]/best")
        );
        assert!(options.no_playlist);
        assert!(options.continue_dl);
        assert!(options.skip_unavailable_fragments);
        assert!((3..=10).contains(&options.retries.unwrap()));
        assert!((3..=10).contains(&options.fragment_retries.unwrap()));
        assert_eq!(options.http_headers.get("Accept-Language").map(String::as_str), Some("en"));
        assert!(options.http_headers.contains_key("User-Agent"));
        assert!(!options.write_subtitles);
        assert!(options.postprocessors.is_empty());
    }

    #[test]
    fn vimeo_mp3_rewrites_extension() {
        let dir = tempdir().unwrap();
        let fake = FakeExtractor::with_steps(vec![FakeExtractor::produce("Song", "webm")]);
        let downloader = Downloader::new(fake.clone(), dir.path());
        let request = DownloadRequest::new("https://vimeo.com/76979871", Quality::Best, Container::Mp3);

        let outcome = downloader.download(&request).unwrap();
        assert_eq!(outcome.platform, Platform::Vimeo);
        assert_eq!(outcome.path, dir.path().join("Song.mp3"));

        let calls = fake.calls.lock();
        let (_, options, _) = &calls[0];
        assert_eq!(options.format.as_deref(), Some("bestaudio/best"));
        assert_eq!(
            options.postprocessors,
            vec![PostProcessor::ExtractAudio {
                codec: "mp3".into(),
                bitrate: 192
            }]
        );
    }

    #[test]
    fn unknown_platform_never_reaches_the_extractor() {
        let dir = tempdir().unwrap();
        let fake = FakeExtractor::with_steps(vec![]);
        let downloader = Downloader::new(fake.clone(), dir.path());
        let request = DownloadRequest::new("https://example.com/foo", Quality::Best, Container::Mp4);

        let err = downloader.download(&request).unwrap_err();
        assert!(matches!(err, GrabError::UnsupportedPlatform { .. }));
        assert_eq!(fake.call_count(), 0);
    }

    #[test]
    fn fallback_runs_once_with_minimal_options() {
        let dir = tempdir().unwrap();
        let fake = FakeExtractor::with_steps(vec![
            Step::Fail("HTTP Error 403: Forbidden".into()),
            FakeExtractor::produce("Recovered", "mp4"),
        ]);
        let downloader = Downloader::new(fake.clone(), dir.path());
        let request = DownloadRequest::new(
            "https://www.youtube.com/watch?v=abcdEFGH123",
            Quality::P1080,
            Container::Webm,
        );

        let outcome = downloader.download(&request).unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.title, "Recovered");

        let calls = fake.calls.lock();
        assert_eq!(calls.len(), 2);
        let (_, fallback, _) = &calls[1];
        assert_eq!(fallback.format.as_deref(), Some("best"));
        assert!(fallback.http_headers.is_empty());
        assert!(fallback.retries.is_none());
        assert!(fallback.fragment_retries.is_none());
        assert!(fallback.postprocessors.is_empty());
    }

    #[test]
    fn audio_fallback_keeps_extraction() {
        let dir = tempdir().unwrap();
        let fake = FakeExtractor::with_steps(vec![
            Step::Fail("boom".into()),
            FakeExtractor::produce("Podcast", "m4a"),
        ]);
        let downloader = Downloader::new(fake.clone(), dir.path());
        let request =
            DownloadRequest::new("https://youtu.be/abcdEFGH123", Quality::P360, Container::M4a);

        let outcome = downloader.download(&request).unwrap();
        assert_eq!(outcome.path, dir.path().join("Podcast.m4a"));
        let calls = fake.calls.lock();
        let (_, fallback, _) = &calls[1];
        assert_eq!(fallback.format.as_deref(), Some("bestaudio/best"));
        assert_eq!(fallback.audio_extension(), Some("m4a"));
    }

    #[test]
    fn both_attempts_failing_surfaces_the_last_message() {
        let dir = tempdir().unwrap();
        let fake = FakeExtractor::with_steps(vec![
            Step::Fail("first".into()),
            Step::Fail("Video unavailable in your country".into()),
        ]);
        let downloader = Downloader::new(fake.clone(), dir.path());
        let request = DownloadRequest::new("https://vimeo.com/1", Quality::Best, Container::Mp4);

        match downloader.download(&request) {
            Err(GrabError::DownloadFailed(message)) => {
                assert!(message.contains("Video unavailable"), "{message}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(fake.call_count(), 2);
    }

    #[test]
    fn success_without_a_file_triggers_the_fallback() {
        let dir = tempdir().unwrap();
        let fake = FakeExtractor::with_steps(vec![
            Step::Phantom,
            FakeExtractor::produce("Real", "mp4"),
        ]);
        let downloader = Downloader::new(fake.clone(), dir.path());
        let request = DownloadRequest::new("https://vimeo.com/1", Quality::Best, Container::Mp4);

        let outcome = downloader.download(&request).unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.path, dir.path().join("Real.mp4"));
    }

    #[test]
    fn subtitles_request_english() {
        let dir = tempdir().unwrap();
        let fake = FakeExtractor::with_steps(vec![FakeExtractor::produce("Talk", "mp4")]);
        let downloader = Downloader::new(fake.clone(), dir.path());
        let mut request =
            DownloadRequest::new("https://www.dailymotion.com/video/x1", Quality::P480, Container::Mp4);
        request.subtitles = true;

        downloader.download(&request).unwrap();
        let calls = fake.calls.lock();
        let (_, options, _) = &calls[0];
        assert!(options.write_subtitles);
        assert_eq!(options.subtitle_langs, vec!["en".to_string()]);
    }

    #[test]
    fn long_titles_are_truncated_in_the_template() {
        let dir = tempdir().unwrap();
        let title = "x".repeat(400);
        let fake = FakeExtractor::with_steps(vec![FakeExtractor::produce(&title, "mp4")]);
        let downloader = Downloader::new(fake, dir.path());
        let request = DownloadRequest::new("https://vimeo.com/1", Quality::Best, Container::Mp4);

        let outcome = downloader.download(&request).unwrap();
        let name = outcome.path.file_stem().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), MAX_TITLE_BYTES);
    }

    #[test]
    fn private_passphrase_requires_flag_and_value() {
        let mut request = DownloadRequest::new("https://vimeo.com/1", Quality::Best, Container::Mp4);
        request.passphrase = Some("hunter2".into());
        assert_eq!(request.private_passphrase(), None);
        request.private = true;
        assert_eq!(request.private_passphrase(), Some("hunter2"));
        request.passphrase = Some(String::new());
        assert_eq!(request.private_passphrase(), None);
    }

    #[test]
    fn request_payload_uses_labels() {
        let request: DownloadRequest = serde_json::from_str(
            r#"{"url":"https://vimeo.com/1","quality":"720p","container":"MP3","subtitles":true}"#,
        )
        .unwrap();
        assert_eq!(request.quality, Quality::P720);
        assert_eq!(request.container, Container::Mp3);
        assert!(request.subtitles);
        assert!(!request.private);

        let bad = serde_json::from_str::<DownloadRequest>(
            r#"{"url":"https://vimeo.com/1","quality":"8K","container":"MP4"}"#,
        );
        assert!(bad.is_err());
    }
}
