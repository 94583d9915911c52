//! What a session is playing.
//!
//! [`SessionMedia`] is a closed set of variants selected by [`MediaMode`].
//! Every variant has the same two-step lifecycle: `init` prepares whatever
//! the media needs inside the session working directory and rewrites the
//! client-facing [`MediaData`], `cleanup` releases it again.

mod remote;
mod stored;
mod transcode;

use cowatch_proto::{MediaData, MediaMode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::models::UserId;
use crate::storage::{FileAccess, SessionDirs};
use crate::transcode::{MediaToolkit, TranscoderLauncher};
use crate::{Error, Result};

pub use remote::RemoteMedia;
pub use stored::StoredFileMedia;
pub use transcode::LiveTranscodeMedia;

/// Collaborators media variants use during `init`
#[derive(Clone)]
pub struct MediaServices {
    pub files: Arc<dyn FileAccess>,
    pub toolkit: Arc<dyn MediaToolkit>,
    pub launcher: TranscoderLauncher,
    pub manifest_timeout: Duration,
}

impl MediaServices {
    pub fn new(
        files: Arc<dyn FileAccess>,
        toolkit: Arc<dyn MediaToolkit>,
        launcher: TranscoderLauncher,
        manifest_timeout: Duration,
    ) -> Self {
        Self {
            files,
            toolkit,
            launcher,
            manifest_timeout,
        }
    }

    /// Local media library and ffmpeg tooling as configured
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(crate::storage::LocalFileAccess::new(&config.storage.media_root)),
            Arc::new(crate::transcode::FfmpegToolkit::new(
                &config.transcoder.ffprobe_program,
                &config.transcoder.ffmpeg_program,
            )),
            TranscoderLauncher::from_config(&config.transcoder),
            config.transcoder.manifest_timeout(),
        )
    }
}

impl std::fmt::Debug for MediaServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaServices")
            .field("launcher", &self.launcher)
            .field("manifest_timeout", &self.manifest_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum SessionMedia {
    StoredFile(StoredFileMedia),
    LiveTranscode(LiveTranscodeMedia),
    Remote(RemoteMedia),
}

impl SessionMedia {
    /// Pick the variant for a client's media request.
    pub fn from_request(data: MediaData) -> Result<Self> {
        if data.uri.trim().is_empty() {
            return Err(Error::InvalidInput("Media uri must not be empty".to_string()));
        }

        Ok(match data.mode {
            MediaMode::Native => Self::StoredFile(StoredFileMedia::new(data)),
            MediaMode::LiveTranscode => Self::LiveTranscode(LiveTranscodeMedia::new(data)),
            MediaMode::Hls | MediaMode::Youtube | MediaMode::Twitch => {
                Self::Remote(RemoteMedia::new(data))
            }
        })
    }

    #[must_use]
    pub fn data(&self) -> &MediaData {
        match self {
            Self::StoredFile(media) => media.data(),
            Self::LiveTranscode(media) => media.data(),
            Self::Remote(media) => media.data(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> MediaMode {
        self.data().mode
    }

    /// Prepare the media for `issuer`. On failure nothing is left behind.
    pub async fn init(
        &mut self,
        services: &MediaServices,
        dirs: &SessionDirs,
        issuer: &UserId,
    ) -> Result<()> {
        match self {
            Self::StoredFile(media) => media.init(services, dirs, issuer).await,
            Self::LiveTranscode(media) => media.init(services, dirs, issuer).await,
            Self::Remote(media) => media.init(),
        }
    }

    /// Release processes and files created by `init`.
    pub async fn cleanup(self) {
        match self {
            Self::StoredFile(media) => media.cleanup().await,
            Self::LiveTranscode(media) => media.cleanup().await,
            Self::Remote(_) => {}
        }
    }
}

/// File extension of `path`, limited to characters safe in a URI
fn safe_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
}
