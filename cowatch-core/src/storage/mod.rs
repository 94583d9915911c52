//! Filesystem collaborators: user media access and session working directories.

pub mod file;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{generate_id, SessionId, UserId};
use crate::Result;

pub use file::LocalFileAccess;

const PUBLIC_DIR: &str = "public";

/// Access to the media files users are allowed to share.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// Resolve `path` in `user`'s library to a file on disk
    async fn resolve(&self, user: &UserId, path: &str) -> Result<PathBuf>;

    async fn hard_link(&self, src: &Path, dest: &Path) -> Result<()>;

    async fn is_file(&self, path: &Path) -> Result<bool>;
}

/// Working directory of one session instance. Everything served to clients
/// lives under `public/`.
///
/// A session recreated under the same id gets a different directory, so a
/// predecessor still tearing down never removes its files.
#[derive(Debug, Clone)]
pub struct SessionDirs {
    root: PathBuf,
    public: PathBuf,
}

impl SessionDirs {
    /// Allocate `<sessions_dir>/<session_id>-<random>`
    #[must_use]
    pub fn new(sessions_dir: &Path, session_id: &SessionId) -> Self {
        let root = sessions_dir.join(format!("{session_id}-{}", generate_id()));
        let public = root.join(PUBLIC_DIR);
        Self { root, public }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn public(&self) -> &Path {
        &self.public
    }

    pub async fn ensure(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.public).await?;
        Ok(())
    }

    /// Fresh, not yet created path `public/<prefix>-<random>`
    #[must_use]
    pub fn allocate(&self, prefix: &str) -> PathBuf {
        self.public.join(format!("{prefix}-{}", generate_id()))
    }

    /// `/`-separated URI of `path` relative to `public/`
    #[must_use]
    pub fn public_uri(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.public).ok()?;
        let parts = relative
            .iter()
            .map(|part| part.to_str())
            .collect::<Option<Vec<_>>>()?;
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// Remove the whole working directory, logging failures.
    pub async fn remove(&self) {
        remove_dir_best_effort(&self.root).await;
    }
}

/// Remove `path` recursively. Files appearing concurrently make removal fail
/// with `DirectoryNotEmpty`; those attempts are retried and a final failure
/// is only logged.
pub async fn remove_dir_best_effort(path: &Path) {
    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(3)
        .with_jitter()
        .build();

    let mut last_err = None;
    for delay in std::iter::once(Duration::ZERO).chain(backoff) {
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Removed directory");
                return;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return,
            Err(e) => {
                tracing::debug!(
                    path = %path.display(),
                    error = %e,
                    "Directory removal failed - retrying in {:?}",
                    delay
                );
                last_err = Some(e);
            }
        }
    }

    if let Some(e) = last_err {
        tracing::warn!(path = %path.display(), error = %e, "Giving up on directory removal");
    }
}

/// Remove a single file, logging anything but `NotFound`.
pub async fn remove_file_best_effort(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}
