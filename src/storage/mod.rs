//! Blob stores the uploaded documents are fetched from.

pub mod local;
pub mod s3;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{ConfigError, StorageBackend, StorageConfig};

pub use local::LocalStore;
pub use s3::S3Store;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Storage returned {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the raw bytes stored under `key`.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Build the configured store, sharing the process-wide HTTP client.
pub fn from_config(
    config: &StorageConfig,
    http: reqwest::Client,
) -> Result<Arc<dyn BlobStore>, ConfigError> {
    match config.backend {
        StorageBackend::S3 => Ok(Arc::new(S3Store::from_config(config, http)?)),
        StorageBackend::Local => Ok(Arc::new(LocalStore::new(&config.local_dir))),
    }
}
