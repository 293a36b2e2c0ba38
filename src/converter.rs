//! Audio conversion of finished downloads with ffmpeg.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::planner::AUDIO_BITRATE_KBPS;

/// Converts `source` to `<converted_dir>/<stem>.mp3`, overwriting any earlier
/// conversion of the same file.
pub fn convert_to_audio(ffmpeg: &Path, source: &Path, converted_dir: &Path) -> Result<PathBuf> {
    if !source.is_file() {
        bail!("source file {} does not exist", source.display());
    }
    let stem = source
        .file_stem()
        .with_context(|| format!("{} has no file name", source.display()))?;
    fs::create_dir_all(converted_dir)
        .with_context(|| format!("creating {}", converted_dir.display()))?;
    let mut file_name = stem.to_os_string();
    file_name.push(".mp3");
    let target = converted_dir.join(file_name);

    let output = Command::new(ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(source)
        .args(["-vn", "-codec:a", "libmp3lame", "-b:a"])
        .arg(format!("{AUDIO_BITRATE_KBPS}k"))
        .arg(&target)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("launching {}", ffmpeg.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.lines().last().unwrap_or_default().trim()
        );
    }
    if !target.is_file() {
        bail!("ffmpeg reported success but {} is missing", target.display());
    }

    info!(source = %source.display(), target = %target.display(), "converted to mp3");
    Ok(target)
}
