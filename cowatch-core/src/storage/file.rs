// Local filesystem media library
//
// Each user owns <media_root>/<user_id>/; requested paths are resolved inside
// that directory only.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use super::FileAccess;
use crate::models::{SessionId, UserId};
use crate::{Error, Result};

/// [`FileAccess`] over a directory of per-user libraries
#[derive(Debug, Clone)]
pub struct LocalFileAccess {
    media_root: PathBuf,
}

impl LocalFileAccess {
    pub fn new(media_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
        }
    }

    fn user_path(&self, user: &UserId, path: &str) -> Result<PathBuf> {
        // User ids follow the same charset rules as session ids.
        if !SessionId::is_valid(user.as_str()) {
            return Err(Error::Authorization(format!("Invalid user id: {user}")));
        }

        let relative = Path::new(path.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::Authorization(format!(
                "Path escapes the media library: {path}"
            )));
        }

        Ok(self.media_root.join(user.as_str()).join(relative))
    }
}

#[async_trait]
impl FileAccess for LocalFileAccess {
    async fn resolve(&self, user: &UserId, path: &str) -> Result<PathBuf> {
        let full_path = self.user_path(user, path)?;
        if !self.is_file(&full_path).await? {
            return Err(Error::NotFound(format!("Media file not found: {path}")));
        }

        tracing::trace!("Resolved {} for user {} to {:?}", path, user, full_path);
        Ok(full_path)
    }

    async fn hard_link(&self, src: &Path, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::hard_link(src, dest).await?;
        Ok(())
    }

    async fn is_file(&self, path: &Path) -> Result<bool> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library() -> (TempDir, LocalFileAccess) {
        let temp = TempDir::new().unwrap();
        let user_dir = temp.path().join("alice").join("movies");
        std::fs::create_dir_all(&user_dir).unwrap();
        std::fs::write(user_dir.join("clip.mp4"), b"not really a video").unwrap();
        let access = LocalFileAccess::new(temp.path());
        (temp, access)
    }

    #[tokio::test]
    async fn test_resolve_inside_user_library() {
        let (temp, access) = library();
        let path = access
            .resolve(&UserId::from("alice"), "movies/clip.mp4")
            .await
            .unwrap();
        assert_eq!(path, temp.path().join("alice/movies/clip.mp4"));
    }

    #[tokio::test]
    async fn test_resolve_rejects_traversal() {
        let (_temp, access) = library();
        let result = access
            .resolve(&UserId::from("bob"), "../alice/movies/clip.mp4")
            .await;
        assert!(matches!(result, Err(Error::Authorization(_))));

        let result = access.resolve(&UserId::from("../alice"), "movies/clip.mp4").await;
        assert!(matches!(result, Err(Error::Authorization(_))));
    }

    #[tokio::test]
    async fn test_resolve_missing_file_and_directory() {
        let (_temp, access) = library();
        let user = UserId::from("alice");
        assert!(matches!(
            access.resolve(&user, "movies/missing.mp4").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            access.resolve(&user, "movies").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hard_link_creates_parent() {
        let (temp, access) = library();
        let src = temp.path().join("alice/movies/clip.mp4");
        let dest = temp.path().join("session/public/media-x/abc.mp4");

        access.hard_link(&src, &dest).await.unwrap();
        assert!(access.is_file(&dest).await.unwrap());
        assert_eq!(std::fs::read(&dest).unwrap(), b"not really a video");
    }
}
