use cowatch_proto::MediaData;
use std::path::PathBuf;
use tracing::{debug, info};

use super::{safe_extension, MediaServices};
use crate::models::{generate_id, UserId};
use crate::storage::{remove_dir_best_effort, SessionDirs};
use crate::{Error, Result};

/// A file from the issuer's library, served as-is
#[derive(Debug, Clone)]
pub struct StoredFileMedia {
    data: MediaData,
    dir: Option<PathBuf>,
}

impl StoredFileMedia {
    pub(crate) fn new(data: MediaData) -> Self {
        Self { data, dir: None }
    }

    #[must_use]
    pub fn data(&self) -> &MediaData {
        &self.data
    }

    /// Hard-link the issuer's file to `public/media-<random>/<random>.<ext>`
    /// and point `uri` at it.
    pub(crate) async fn init(
        &mut self,
        services: &MediaServices,
        dirs: &SessionDirs,
        issuer: &UserId,
    ) -> Result<()> {
        let source = services.files.resolve(issuer, &self.data.uri).await?;

        let dir = dirs.allocate("media");
        let file_name = match safe_extension(&source) {
            Some(ext) => format!("{}.{ext}", generate_id()),
            None => generate_id(),
        };
        let dest = dir.join(file_name);

        if let Err(e) = services.files.hard_link(&source, &dest).await {
            remove_dir_best_effort(&dir).await;
            return Err(e);
        }

        let uri = dirs.public_uri(&dest).ok_or_else(|| {
            Error::Internal(format!("{} is outside the public directory", dest.display()))
        })?;
        info!(source = %source.display(), uri, "Linked stored media into session");

        self.data.uri = uri;
        self.dir = Some(dir);
        Ok(())
    }

    pub(crate) async fn cleanup(self) {
        if let Some(dir) = self.dir {
            debug!(dir = %dir.display(), "Cleaning up stored media");
            remove_dir_best_effort(&dir).await;
        }
    }
}
