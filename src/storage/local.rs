use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};

use super::{Storage, StorageError};
use crate::utils::{processed_name, MAX_FILENAME_LENGTH, PROCESSED_PREFIX};

const MAX_NAME_ATTEMPTS: usize = 1000;

// Local filesystem storage
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf, // Flat directory holding originals and derived files
}

impl LocalStorage {
    /// Creates a new LocalStorage, making sure the base directory exists.
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Tries to atomically claim `name`. `Ok(None)` means it is taken.
    async fn claim(&self, name: &str) -> Result<Option<(PathBuf, fs::File)>, StorageError> {
        // The derived name must be free as well, or the thumbnail of this
        // upload would clobber another upload.
        if fs::try_exists(self.base_path.join(processed_name(name))).await? {
            return Ok(None);
        }

        let full_path = self.base_path.join(name);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
        {
            Ok(file) => Ok(Some((full_path, file))),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(&self, filename: &str, content: Bytes) -> Result<PathBuf, StorageError> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let candidate = candidate_name(filename, attempt);
            let Some((full_path, mut file)) = self.claim(&candidate).await? else {
                continue;
            };

            file.write_all(&content).await?;
            file.flush().await?;

            tracing::info!("Saved file at {:?}", full_path);
            return Ok(full_path);
        }

        Err(StorageError::NameExhausted(
            filename.to_string(),
            MAX_NAME_ATTEMPTS,
        ))
    }
}

/// `photo.png`, `photo_1.png`, `photo_2.png`, ...
///
/// The stem is shortened when needed so the derived `processed_` name of
/// every candidate still fits in one path component.
fn candidate_name(filename: &str, attempt: usize) -> String {
    if attempt == 0 {
        return filename.to_string();
    }

    let suffix = format!("_{}", attempt);
    let budget = MAX_FILENAME_LENGTH - PROCESSED_PREFIX.len() - suffix.len();

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.len() < budget => (stem, ext),
        _ => (filename, ""),
    };

    if ext.is_empty() {
        format!("{}{}", truncate_str(stem, budget), suffix)
    } else {
        let stem_budget = budget - ext.len() - 1;
        format!("{}{}.{}", truncate_str(stem, stem_budget), suffix, ext)
    }
}

fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let end = (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0);
    &s[..end]
}
