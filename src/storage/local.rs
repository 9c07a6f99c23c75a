//! Local filesystem storage.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{StorageBackend, StorageError, StorageKind};
use crate::document::StorageLocator;

/// Stores artifacts under a base directory using the locator as a relative path.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Creates the backend, making sure the base directory exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub async fn create(base_dir: PathBuf) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| StorageError::io(&base_dir, e))?;
        Ok(Self { base_dir })
    }

    /// Root directory of this backend.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, locator: &StorageLocator) -> Result<PathBuf, StorageError> {
        Ok(locator.resolve_under(&self.base_dir)?)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn save(&self, locator: &StorageLocator, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(prefix) = locator.prefix() {
            self.create_directories(prefix).await?;
        }
        let path = self.path_for(locator)?;
        let temp = temp_path(&path);

        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| StorageError::io(&temp, e))?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StorageError::io(&temp, e));
        }

        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StorageError::io(&path, e));
        }

        debug!(path = %path.display(), bytes = bytes.len(), "artifact saved");
        Ok(())
    }

    async fn exists(&self, locator: &StorageLocator) -> Result<bool, StorageError> {
        Ok(self.size(locator).await? > 0)
    }

    async fn size(&self, locator: &StorageLocator) -> Result<u64, StorageError> {
        let path = self.path_for(locator)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Ok(0),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    async fn create_directories(&self, prefix: &str) -> Result<(), StorageError> {
        let dir = StorageLocator::parse(prefix)?.resolve_under(&self.base_dir)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))
    }

    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    fn describe(&self) -> String {
        self.base_dir.display().to_string()
    }
}
