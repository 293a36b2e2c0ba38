//! Per-session record of finished downloads.
//!
//! History is a plain append-ordered list. Private buckets are keyed by the
//! BLAKE3 hex digest of a passphrase; the passphrase itself is never kept.
//! The digest is only a lookup key and the files on disk are not encrypted.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::downloader::DownloadOutcome;
use crate::error::GrabError;
use crate::planner::Container;
use crate::platform::Platform;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub title: String,
    pub platform: Platform,
    pub url: String,
    /// Local wall-clock time of the download, `YYYY-MM-DD HH:MM:SS`.
    pub time: String,
    pub file: PathBuf,
    pub format: Container,
}

impl ArtifactRecord {
    pub fn new(
        title: impl Into<String>,
        platform: Platform,
        url: impl Into<String>,
        file: impl Into<PathBuf>,
        format: Container,
    ) -> Self {
        Self {
            title: title.into(),
            platform,
            url: url.into(),
            time: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            file: file.into(),
            format,
        }
    }

    pub fn from_outcome(outcome: &DownloadOutcome, url: &str, format: Container) -> Self {
        Self::new(
            outcome.title.clone(),
            outcome.platform,
            url,
            outcome.path.clone(),
            format,
        )
    }

    pub fn file_exists(&self) -> bool {
        self.file.is_file()
    }
}

/// Where [`Registry::record`] filed an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    History,
    Private,
}

pub fn passphrase_hash(passphrase: &str) -> String {
    blake3::hash(passphrase.as_bytes()).to_hex().to_string()
}

#[derive(Debug, Default)]
pub struct Registry {
    history: Vec<ArtifactRecord>,
    private: HashMap<String, Vec<ArtifactRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> &[ArtifactRecord] {
        &self.history
    }

    pub fn record_public(&mut self, artifact: ArtifactRecord) {
        self.history.push(artifact);
    }

    pub fn record_private(&mut self, passphrase: &str, artifact: ArtifactRecord) {
        self.private
            .entry(passphrase_hash(passphrase))
            .or_default()
            .push(artifact);
    }

    /// Files into a private bucket when a non-empty passphrase is given,
    /// into history otherwise.
    pub fn record(&mut self, artifact: ArtifactRecord, passphrase: Option<&str>) -> Destination {
        match passphrase.filter(|passphrase| !passphrase.is_empty()) {
            Some(passphrase) => {
                self.record_private(passphrase, artifact);
                Destination::Private
            }
            None => {
                self.record_public(artifact);
                Destination::History
            }
        }
    }

    /// Bucket contents for `passphrase`; empty for unknown passphrases.
    pub fn reveal(&self, passphrase: &str) -> &[ArtifactRecord] {
        self.private
            .get(&passphrase_hash(passphrase))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn delete_public(&mut self, index: usize) -> Result<ArtifactRecord, GrabError> {
        delete_record(&mut self.history, index)
    }

    pub fn delete_private(
        &mut self,
        passphrase: &str,
        index: usize,
    ) -> Result<ArtifactRecord, GrabError> {
        let key = passphrase_hash(passphrase);
        let bucket = self
            .private
            .get_mut(&key)
            .ok_or_else(|| GrabError::NotFound(format!("private entry {index}")))?;
        delete_record(bucket, index)
    }

    pub fn private_bucket_count(&self) -> usize {
        self.private.len()
    }
}

/// Removes exactly one record and makes a best-effort attempt at its file.
/// An already-missing file is fine; other removal failures are logged and the
/// record is dropped anyway.
pub fn delete_record(
    list: &mut Vec<ArtifactRecord>,
    index: usize,
) -> Result<ArtifactRecord, GrabError> {
    if index >= list.len() {
        return Err(GrabError::NotFound(format!("entry {index}")));
    }
    let record = list.remove(index);
    remove_artifact_file(&record.file);
    Ok(record)
}

fn remove_artifact_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), "could not delete artifact file: {err}"),
    }
}
