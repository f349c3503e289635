//! S3 storage backend for cloud object storage.
//!
//! Supports any S3-compatible service (AWS S3, Hetzner Object Storage, MinIO,
//! etc.) via `force_path_style`, matching the teacher's object-store setup.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client, Config,
};

use super::{HealthStatus, StorageBackend};
use crate::error::{Error, Result};

/// S3 storage backend configuration.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub prefix: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// S3 storage backend.
pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: String,
}

fn full_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), key)
    }
}

fn strip_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        let prefix_with_slash = format!("{}/", prefix.trim_end_matches('/'));
        key.strip_prefix(&prefix_with_slash).unwrap_or(key).to_string()
    }
}

impl S3Storage {
    pub fn new(config: S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "callrelay-s3",
        );

        let s3_config = Config::builder()
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .region(Region::new(config.region))
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }

    fn full_key(&self, key: &str) -> String {
        full_key(&self.prefix, key)
    }

    fn strip_prefix(&self, key: &str) -> String {
        strip_prefix(&self.prefix, key)
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn initialize(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| Error::StorageUnavailable(format!("failed to access S3 bucket: {e}")))?;

        tracing::info!(bucket = %self.bucket, prefix = %self.prefix, "S3 storage initialized");
        Ok(())
    }

    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let full_key = self.full_key(key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Error::StorageUnavailable(format!("failed to upload to S3: {e}")))?;

        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let full_key = self.full_key(key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Error::StorageUnavailable(format!("failed to download from S3: {e}")))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| Error::StorageUnavailable(format!("failed to read S3 response body: {e}")))?
            .into_bytes();

        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| Error::StorageUnavailable(format!("failed to delete from S3: {e}")))?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);

            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::StorageUnavailable(format!("failed to list S3 objects: {e}")))?;

            if let Some(contents) = response.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        keys.push(self.strip_prefix(&key));
                    }
                }
            }

            if response.is_truncated.unwrap_or(false) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(keys)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(HealthStatus {
                is_healthy: true,
                message: format!("S3 bucket '{}' is accessible", self.bucket),
            }),
            Err(e) => Ok(HealthStatus {
                is_healthy: false,
                message: format!("S3 bucket '{}' not accessible: {e}", self.bucket),
            }),
        }
    }

    async fn get_presigned_url(&self, key: &str, expires_in: std::time::Duration) -> Result<String> {
        let full_key = self.full_key(key);
        let presigning_config = aws_sdk_s3::presigning::PresigningConfig::expires_in(expires_in)
            .map_err(|e| Error::StorageUnavailable(format!("failed to create presigning config: {e}")))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .presigned(presigning_config)
            .await
            .map_err(|e| Error::StorageUnavailable(format!("failed to generate presigned URL: {e}")))?;

        Ok(presigned_request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_key_joins_prefix_and_key() {
        assert_eq!(full_key("users/acme", "drive/file.txt"), "users/acme/drive/file.txt");
        assert_eq!(strip_prefix("users/acme", "users/acme/drive/file.txt"), "drive/file.txt");
    }

    #[test]
    fn full_key_passes_through_without_prefix() {
        assert_eq!(full_key("", "drive/file.txt"), "drive/file.txt");
        assert_eq!(strip_prefix("", "drive/file.txt"), "drive/file.txt");
    }
}
