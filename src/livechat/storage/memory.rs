use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{BlobStore, StorageError};

/// A stored object and the content type it was uploaded with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Keeps blobs in memory and serves them under `base_url`
pub struct InMemoryBlobStore {
    base_url: String,
    blobs: DashMap<String, StoredBlob>,
    rejection: RwLock<Option<String>>,
}

impl InMemoryBlobStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            blobs: DashMap::new(),
            rejection: RwLock::new(None),
        }
    }

    pub fn get(&self, path: &str) -> Option<StoredBlob> {
        self.blobs.get(path).map(|blob| blob.clone())
    }

    /// Makes every following upload fail with `reason`, or accepts uploads again with `None`
    pub fn reject_uploads(&self, reason: Option<&str>) {
        *self
            .rejection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_string);
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        if let Some(reason) = self
            .rejection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(StorageError::Rejected(reason));
        }
        tracing::debug!(
            target: "livechat::storage::memory",
            "Storing {} bytes ({}) at {}",
            data.len(),
            content_type,
            path
        );
        self.blobs.insert(
            path.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn download_url(&self, path: &str) -> Result<String, StorageError> {
        if !self.blobs.contains_key(path) {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(format!("{}/{}", self.base_url, path))
    }
}
