//! Object storage for uploaded media.
//!
//! [`BlobStore`] accepts bytes with a content-type hint at a path and can later hand
//! out a URL the file is retrievable from.

mod memory;

pub use memory::InMemoryBlobStore;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` at `path`, replacing anything already there
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// Resolves a URL the object at `path` can be downloaded from
    async fn download_url(&self, path: &str) -> Result<String, StorageError>;
}
