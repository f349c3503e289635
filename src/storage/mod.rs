//! Storage module for S3/MinIO and local file operations.
//!
//! Audio blobs are content-addressed by the key the ingest handler derives
//! from the upload (spec §4.1); this module only knows how to move bytes
//! under a key, not how that key is built.

pub mod local;
pub mod s3;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Storage trait for different backends.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()>;
    async fn download(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn health_check(&self) -> Result<HealthStatus>;

    /// Generate a presigned URL for temporary public access to an object.
    /// Not every backend supports this (local storage doesn't).
    async fn get_presigned_url(&self, key: &str, expires_in: Duration) -> Result<String>;

    /// The on-disk path for `key`, if this backend keeps one a same-machine
    /// process can read directly. `None` for backends with no local
    /// filesystem presence (S3).
    fn local_path(&self, key: &str) -> Option<std::path::PathBuf> {
        let _ = key;
        None
    }
}

/// Main storage interface. Cheap to clone; wraps the backend in an `Arc`.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl Storage {
    pub fn s3(
        bucket: String,
        endpoint: String,
        access_key: String,
        secret_key: String,
        region: String,
    ) -> Result<Self> {
        let backend = s3::S3Storage::new(s3::S3Config {
            endpoint,
            bucket,
            prefix: String::new(),
            access_key,
            secret_key,
            region,
        })?;
        Ok(Self {
            backend: Arc::new(backend),
        })
    }

    pub fn local(path: String) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(local::LocalStorage::new(path)?),
        })
    }

    pub async fn initialize(&self) -> Result<()> {
        self.backend.initialize().await
    }

    pub async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.backend.upload(key, data).await
    }

    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.backend.download(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.backend.list(prefix).await
    }

    pub async fn health_check(&self) -> Result<HealthStatus> {
        self.backend.health_check().await
    }

    pub async fn get_presigned_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        self.backend.get_presigned_url(key, expires_in).await
    }

    pub fn local_path(&self, key: &str) -> Option<std::path::PathBuf> {
        self.backend.local_path(key)
    }
}

/// Health status for storage.
#[derive(Debug)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::local(temp_dir.path().to_str().unwrap().to_string()).unwrap();

        storage.initialize().await.unwrap();

        let data = b"test data".to_vec();
        storage.upload("test.txt", data.clone()).await.unwrap();

        let downloaded = storage.download("test.txt").await.unwrap();
        assert_eq!(downloaded, data);

        let files = storage.list("").await.unwrap();
        assert!(files.iter().any(|f| f.contains("test.txt")));

        storage.delete("test.txt").await.unwrap();
    }
}
