//! Local filesystem storage backend, used when `STORAGE_MODE=local`.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::{HealthStatus, StorageBackend};

pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(path: String) -> Result<Self> {
        Ok(Self {
            base_path: PathBuf::from(path),
        })
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.base_path.join(key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.base_path.join(key);
        Ok(tokio::fs::read(path).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.base_path.join(key);
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = self.base_path.join(prefix);
        let mut files = Vec::new();

        let mut dir = tokio::fs::read_dir(prefix_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    files.push(format!("{prefix}/{name}"));
                }
            }
        }

        Ok(files)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match tokio::fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => Ok(HealthStatus {
                is_healthy: true,
                message: format!("local storage at {:?} is accessible", self.base_path),
            }),
            _ => Ok(HealthStatus {
                is_healthy: false,
                message: format!("local storage at {:?} not accessible", self.base_path),
            }),
        }
    }

    async fn get_presigned_url(&self, _key: &str, _expires_in: Duration) -> Result<String> {
        Err(Error::Other(
            "presigned URLs not supported for local storage".into(),
        ))
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        Some(self.base_path.join(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn round_trips_bytes_through_nested_key() {
        let dir = TempDir::new().unwrap();
        let backend = LocalStorage::new(dir.path().to_str().unwrap().to_string()).unwrap();
        backend.initialize().await.unwrap();

        backend
            .upload("2026/07/28/abc.mp3", b"audio".to_vec())
            .await
            .unwrap();
        let data = backend.download("2026/07/28/abc.mp3").await.unwrap();
        assert_eq!(data, b"audio");
    }

    #[tokio::test]
    async fn missing_key_is_an_error() {
        let dir = TempDir::new().unwrap();
        let backend = LocalStorage::new(dir.path().to_str().unwrap().to_string()).unwrap();
        backend.initialize().await.unwrap();
        assert!(backend.download("nope.mp3").await.is_err());
    }
}
