use cowatch_proto::{MediaData, MediaMode};

use crate::{Error, Result};

/// Media played straight from an external platform or playlist URL
#[derive(Debug, Clone)]
pub struct RemoteMedia {
    data: MediaData,
}

impl RemoteMedia {
    pub(crate) fn new(data: MediaData) -> Self {
        Self { data }
    }

    #[must_use]
    pub fn data(&self) -> &MediaData {
        &self.data
    }

    pub(crate) fn init(&mut self) -> Result<()> {
        self.data.uri = self.data.uri.trim().to_string();

        // YouTube and Twitch accept bare video/channel ids.
        if self.data.mode == MediaMode::Hls
            && !(self.data.uri.starts_with("https://") || self.data.uri.starts_with("http://"))
        {
            return Err(Error::InvalidInput(format!(
                "HLS media must be an http(s) URL: {}",
                self.data.uri
            )));
        }
        Ok(())
    }
}
