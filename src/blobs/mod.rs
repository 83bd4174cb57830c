//! Audio file storage under the app data directory.
//!
//! Recordings are addressed by URI strings. Local captures are plain file
//! paths inside the recordings directory; recordings imported from the server
//! keep their `http(s)://` URL and are never downloaded.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::db::is_remote_uri;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the recordings directory if it is missing.
    pub async fn ensure_directory(&self) -> Result<()> {
        if fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(());
        }
        info!("Recordings directory doesn't exist, creating {:?}", self.root);
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SyncError::io_at("create recordings directory", &self.root, e))
    }

    /// Moves a finished capture into permanent storage and returns its URI.
    ///
    /// The temp file is removed on failure so captures never leak.
    pub async fn commit(&self, temp_path: &Path, filename: &str) -> Result<String> {
        let result = self.move_into_place(temp_path, filename).await;

        if let Err(e) = &result {
            error!("Failed to commit recording {:?}: {}", temp_path, e);
            if let Err(cleanup) = fs::remove_file(temp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    error!("Cleanup of temp capture {:?} failed: {}", temp_path, cleanup);
                }
            }
        }

        result
    }

    async fn move_into_place(&self, temp_path: &Path, filename: &str) -> Result<String> {
        if filename.is_empty() || filename.contains(['/', '\\']) {
            return Err(SyncError::validation(format!(
                "invalid recording filename {filename:?}"
            )));
        }

        self.ensure_directory().await?;
        let target = self.root.join(filename);
        debug!("Moving recording from {:?} to {:?}", temp_path, target);

        if let Err(e) = fs::rename(temp_path, &target).await {
            // Temp dirs often live on another filesystem; fall back to copy + unlink.
            if !fs::try_exists(temp_path).await.unwrap_or(false) {
                return Err(SyncError::io_at("move capture", temp_path, e));
            }
            fs::copy(temp_path, &target)
                .await
                .map_err(|e| SyncError::io_at("copy capture", temp_path, e))?;
            fs::remove_file(temp_path)
                .await
                .map_err(|e| SyncError::io_at("remove temp capture", temp_path, e))?;
        }

        Ok(target.to_string_lossy().into_owned())
    }

    /// Deletes a local blob. Empty URIs, remote URLs and missing files are no-ops.
    pub async fn remove(&self, uri: &str) -> Result<()> {
        let Some(path) = local_path(uri) else {
            return Ok(());
        };

        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted local file: {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to delete local file {:?}: {}", path, e);
                Err(SyncError::io_at("delete", &path, e))
            }
        }
    }

    /// Remote URLs are assumed to exist; no network check is made.
    pub async fn exists(&self, uri: &str) -> bool {
        if is_remote_uri(uri) {
            return true;
        }
        match local_path(uri) {
            Some(path) => fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            None => false,
        }
    }
}

/// Filesystem path for a local URI (`file://` prefix allowed).
pub fn local_path(uri: &str) -> Option<PathBuf> {
    let uri = uri.trim();
    if uri.is_empty() || is_remote_uri(uri) {
        return None;
    }
    Some(PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri)))
}
