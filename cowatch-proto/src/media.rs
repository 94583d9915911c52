use serde::{Deserialize, Serialize};

/// How the current media is sourced and played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaMode {
    /// File the browser plays directly
    Native,
    /// Remote HLS playlist
    Hls,
    /// Session-local HLS produced by a running transcoder
    LiveTranscode,
    Youtube,
    Twitch,
}

impl MediaMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Hls => "hls",
            Self::LiveTranscode => "live_transcode",
            Self::Youtube => "youtube",
            Self::Twitch => "twitch",
        }
    }
}

impl std::fmt::Display for MediaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media description exchanged with clients.
///
/// Clients send it (with a user-scoped `uri`) to request a change; the server
/// answers with the same shape after rewriting `uri` and filling in duration
/// and side tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaData {
    pub mode: MediaMode,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MediaMetadata>,
}

impl MediaData {
    #[must_use]
    pub fn new(mode: MediaMode, uri: impl Into<String>) -> Self {
        Self {
            mode,
            uri: uri.into(),
            duration_seconds: None,
            metadata: None,
        }
    }

    /// Title supplied with the media, if any
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.title.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
    #[serde(default)]
    pub fonts: Vec<FontAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    pub title: String,
    pub language_tag: String,
    pub codec: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FontAsset {
    pub uri: String,
}
