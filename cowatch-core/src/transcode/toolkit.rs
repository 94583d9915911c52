//! Media probing and lossless side-stream extraction.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use crate::{Error, Result};

/// Stream listing of a media file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProbeReport {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProbeStream {
    pub index: u32,
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub tags: StreamTags,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamTags {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
}

/// Font formats served to clients for styled subtitles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontKind {
    TrueType,
    OpenType,
    Woff,
}

impl FontKind {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::TrueType => "ttf",
            Self::OpenType => "otf",
            Self::Woff => "woff",
        }
    }
}

impl ProbeStream {
    #[must_use]
    pub fn is_subtitle(&self) -> bool {
        self.codec_type.as_deref() == Some("subtitle")
    }

    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.codec_type.as_deref() == Some("attachment")
    }

    /// ISO 639 tag, `und` when the container has none
    #[must_use]
    pub fn language_tag(&self) -> &str {
        self.tags
            .language
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or("und")
    }

    /// Font format of an attachment stream, from codec, filename or mimetype
    #[must_use]
    pub fn font_kind(&self) -> Option<FontKind> {
        if !self.is_attachment() {
            return None;
        }

        match self.codec_name.as_deref() {
            Some("ttf") => return Some(FontKind::TrueType),
            Some("otf") => return Some(FontKind::OpenType),
            _ => {}
        }

        let extension = self
            .tags
            .filename
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("ttf") => return Some(FontKind::TrueType),
            Some("otf") => return Some(FontKind::OpenType),
            Some("woff") => return Some(FontKind::Woff),
            _ => {}
        }

        match self.tags.mimetype.as_deref() {
            Some("font/ttf" | "application/x-truetype-font" | "application/x-font-ttf") => {
                Some(FontKind::TrueType)
            }
            Some("font/otf" | "application/vnd.ms-opentype" | "application/x-font-opentype") => {
                Some(FontKind::OpenType)
            }
            Some("font/woff" | "application/font-woff") => Some(FontKind::Woff),
            _ => None,
        }
    }
}

/// Probe and extraction operations the manifest generator depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Enumerate the streams of `source`
    async fn probe(&self, source: &Path) -> Result<ProbeReport>;

    /// Copy one stream of `source` into `dest` without re-encoding
    async fn extract_stream(&self, source: &Path, stream_index: u32, dest: &Path) -> Result<()>;

    /// Write the attachment stream `stream_index` of `source` to `dest`
    async fn dump_attachment(&self, source: &Path, stream_index: u32, dest: &Path) -> Result<()>;
}

/// [`MediaToolkit`] backed by the ffprobe/ffmpeg executables
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl FfmpegToolkit {
    #[must_use]
    pub fn new(ffprobe: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    async fn run_ffmpeg(&self, args: Vec<std::ffi::OsString>) -> Result<()> {
        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Process(format!("Failed to run {}: {e}", self.ffmpeg.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Process(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, source: &Path) -> Result<ProbeReport> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams"])
            .arg(source)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Probe(format!("Failed to run {}: {e}", self.ffprobe.display())))?;

        if !output.status.success() {
            return Err(Error::Probe(format!(
                "ffprobe exited with {} for {}: {}",
                output.status,
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::Probe(format!("Unreadable ffprobe output: {e}")))
    }

    async fn extract_stream(&self, source: &Path, stream_index: u32, dest: &Path) -> Result<()> {
        self.run_ffmpeg(vec![
            "-nostdin".into(),
            "-y".into(),
            "-v".into(),
            "error".into(),
            "-i".into(),
            source.into(),
            "-map".into(),
            format!("0:{stream_index}").into(),
            "-c".into(),
            "copy".into(),
            dest.into(),
        ])
        .await
    }

    async fn dump_attachment(&self, source: &Path, stream_index: u32, dest: &Path) -> Result<()> {
        // ffmpeg insists on an output; discard a zero-length null one.
        self.run_ffmpeg(vec![
            "-nostdin".into(),
            "-y".into(),
            "-v".into(),
            "error".into(),
            format!("-dump_attachment:{stream_index}").into(),
            dest.into(),
            "-i".into(),
            source.into(),
            "-t".into(),
            "0".into(),
            "-f".into(),
            "null".into(),
            "-".into(),
        ])
        .await
    }
}
