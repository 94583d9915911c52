use cowatch_proto::{MediaData, MediaMetadata, MediaMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{safe_extension, MediaServices};
use crate::models::UserId;
use crate::storage::{remove_dir_best_effort, remove_file_best_effort, SessionDirs};
use crate::transcode::{Manifest, ManifestGenerator, TranscoderProcess};
use crate::{Error, Result};

/// A library file transcoded to HLS while it is being watched.
///
/// Layout inside the session directory:
/// - `<transcode-id>.<ext>`: hard link to the source, not served
/// - `public/<transcode-id>/`: transcoder output, subtitles and fonts
/// - `public/<transcode-id>.m3u8`: master playlist handed to clients
#[derive(Debug)]
pub struct LiveTranscodeMedia {
    data: MediaData,
    resources: Option<TranscodeResources>,
}

#[derive(Debug)]
struct TranscodeResources {
    input: PathBuf,
    output_dir: PathBuf,
    master_playlist: Option<PathBuf>,
    process: Option<TranscoderProcess>,
    generator: Option<Arc<ManifestGenerator>>,
}

impl TranscodeResources {
    async fn release(mut self) {
        if let Some(process) = self.process.take() {
            process.terminate().await;
        }
        remove_dir_best_effort(&self.output_dir).await;
        if let Some(master) = &self.master_playlist {
            remove_file_best_effort(master).await;
        }
        remove_file_best_effort(&self.input).await;
    }
}

impl LiveTranscodeMedia {
    pub(crate) fn new(data: MediaData) -> Self {
        Self {
            data,
            resources: None,
        }
    }

    #[must_use]
    pub fn data(&self) -> &MediaData {
        &self.data
    }

    /// The generated manifest; cached, so this never re-runs extraction.
    pub async fn manifest(&self) -> Option<Result<Arc<Manifest>>> {
        let generator = self.resources.as_ref()?.generator.as_ref()?;
        Some(generator.generate().await)
    }

    pub(crate) async fn init(
        &mut self,
        services: &MediaServices,
        dirs: &SessionDirs,
        issuer: &UserId,
    ) -> Result<()> {
        let source = services.files.resolve(issuer, &self.data.uri).await?;

        let output_dir = dirs.allocate("transcode");
        let transcode_id = output_dir
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Internal("Unnamed transcode directory".to_string()))?;
        let input = match safe_extension(&source) {
            Some(ext) => dirs.root().join(format!("{transcode_id}.{ext}")),
            None => dirs.root().join(&transcode_id),
        };

        let mut resources = TranscodeResources {
            input,
            output_dir,
            master_playlist: None,
            process: None,
            generator: None,
        };

        match self
            .start(services, dirs, &source, &transcode_id, &mut resources)
            .await
        {
            Ok(manifest) => {
                info!(
                    %transcode_id,
                    uri = %manifest.manifest_file_name,
                    duration_seconds = manifest.duration_seconds,
                    "Live transcode ready"
                );
                self.apply_manifest(&manifest);
                self.resources = Some(resources);
                Ok(())
            }
            Err(e) => {
                warn!(%transcode_id, error = %e, "Live transcode failed to start");
                resources.release().await;
                Err(e)
            }
        }
    }

    async fn start(
        &self,
        services: &MediaServices,
        dirs: &SessionDirs,
        source: &Path,
        transcode_id: &str,
        resources: &mut TranscodeResources,
    ) -> Result<Arc<Manifest>> {
        tokio::fs::create_dir_all(&resources.output_dir).await?;
        services.files.hard_link(source, &resources.input).await?;

        let process = services
            .launcher
            .launch(transcode_id, &resources.input, &resources.output_dir)
            .await?;
        let ready = process.ready();
        resources.process = Some(process);

        let generator = Arc::new(ManifestGenerator::new(
            &resources.input,
            dirs.public(),
            &resources.output_dir,
            ready,
            Arc::clone(&services.toolkit),
            services.manifest_timeout,
        )?);
        resources.generator = Some(Arc::clone(&generator));
        resources.master_playlist = Some(dirs.public().join(format!("{transcode_id}.m3u8")));

        generator.generate().await
    }

    fn apply_manifest(&mut self, manifest: &Manifest) {
        #[allow(clippy::cast_precision_loss)]
        let duration = manifest.duration_seconds as f64;
        let title = self.data.metadata.take().and_then(|metadata| metadata.title);

        self.data.mode = MediaMode::LiveTranscode;
        self.data.uri.clone_from(&manifest.manifest_file_name);
        self.data.duration_seconds = Some(duration);
        self.data.metadata = Some(MediaMetadata {
            title,
            subtitles: manifest.subtitle_tracks.clone(),
            fonts: manifest.font_assets.clone(),
        });
    }

    /// Stop the transcoder, then remove its files.
    pub(crate) async fn cleanup(self) {
        if let Some(resources) = self.resources {
            resources.release().await;
        }
    }
}
