use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors from the blob storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Narrow view of the blob store: report text in, conclusion artifacts out.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(&self, bytes: Vec<u8>) -> Result<String, StorageError>;
}

/// In-memory blob store for the CLI and tests.
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store under a caller-chosen key, for seeding fixtures.
    pub fn put_named(&self, key: impl Into<String>, bytes: Vec<u8>) -> String {
        let key = key.into();
        self.blobs
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(key.clone(), bytes);
        key
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<String, StorageError> {
        let key = format!("blob-{}", Uuid::new_v4());
        self.blobs
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .insert(key.clone(), bytes);
        Ok(key)
    }
}
