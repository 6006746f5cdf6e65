mod local;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;

pub use local::LocalStorage;

use crate::config::Config;

// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Io Error: {0}")]
    IoError(#[from] std::io::Error), // Wraps standard I/O errors

    #[error("No free name for {0:?} after {1} attempts")]
    NameExhausted(String, usize),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist an upload under `filename` (already sanitized).
    /// Never overwrites an existing file; returns the path actually written.
    async fn store(&self, filename: &str, content: Bytes) -> Result<PathBuf, StorageError>;
}

/// Prepare the upload directory. Runs once at startup.
pub async fn init_storage(config: &Config) -> Result<LocalStorage, StorageError> {
    let storage = LocalStorage::new(&config.upload_dir).await?;
    info!(dir = %storage.base_path().display(), "Initialized local storage");
    Ok(storage)
}
