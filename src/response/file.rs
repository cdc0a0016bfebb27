//! File storage for generated images

use std::path::PathBuf;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::backend::traits::GeneratedImage;
use crate::error::Result;

/// Writes generated images under a base directory
pub struct ImageStore {
    storage_path: PathBuf,
}

impl ImageStore {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    /// Ensure the storage directory exists
    pub async fn ensure_storage_dir(&self) -> Result<()> {
        if !fs::try_exists(&self.storage_path).await? {
            fs::create_dir_all(&self.storage_path).await?;
            debug!(path = ?self.storage_path, "Created storage directory");
        }
        Ok(())
    }

    /// Save an image under a fresh name, returning its path
    pub async fn save(&self, image: &GeneratedImage) -> Result<PathBuf> {
        self.ensure_storage_dir().await?;

        let filename = format!("{}.{}", Uuid::new_v4(), image.format.extension());
        let file_path = self.storage_path.join(&filename);
        fs::write(&file_path, &image.data).await?;

        debug!(path = ?file_path, size = image.data.len(), "Saved image file");
        Ok(file_path)
    }
}
