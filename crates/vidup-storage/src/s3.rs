//! S3-compatible object store.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_types::region::Region;
use aws_types::SdkConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::S3Config;
use crate::error::{StorageError, StorageResult};
use crate::keys::validate_key;
use crate::store::{ObjectStore, StoredObject, TransferObserver};

/// Multipart part size. Files up to this size go up in a single request.
pub const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3 storage client.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    config: S3Config,
}

impl S3Store {
    /// Create a client. Static credentials are used when configured, the
    /// default provider chain otherwise.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::config_error("bucket name is empty"));
        }

        let region = Region::new(config.region.clone());
        let mut builder = match (&config.access_key_id, &config.secret_access_key) {
            (Some(id), Some(secret)) => {
                let credentials = Credentials::new(id, secret, None, None, "vidup-static");
                Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .region(region)
                    .credentials_provider(credentials)
            }
            _ => {
                let shared: SdkConfig = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                Builder::from(&shared)
            }
        };

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            config,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Generate a presigned GET URL.
    pub async fn presign_get(&self, key: &str) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(self.config.url_expiration)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.config.object_base_url(), key)
    }

    async fn put_single(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
        total: u64,
        observer: &dyn TransferObserver,
    ) -> StorageResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        if observer.is_cancelled() {
            // Finished racing the cancel; do not leave the object behind
            let _ = self.delete(key).await;
            return Err(StorageError::Cancelled);
        }
        observer.on_progress(total, total);
        Ok(())
    }

    async fn put_multipart(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
        total: u64,
        observer: &dyn TransferObserver,
    ) -> StorageResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::upload_failed("missing multipart upload id"))?
            .to_string();

        match self.send_parts(path, key, &upload_id, total, observer).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                    .send()
                    .await
                    .map_err(|e| StorageError::upload_failed(e.to_string()))?;
                Ok(())
            }
            Err(e) => {
                debug!(key, upload_id = %upload_id, "Aborting multipart upload: {}", e);
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, "Failed to abort multipart upload: {}", abort);
                }
                Err(e)
            }
        }
    }

    async fn send_parts(
        &self,
        path: &Path,
        key: &str,
        upload_id: &str,
        total: u64,
        observer: &dyn TransferObserver,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut parts = Vec::new();
        let mut sent: u64 = 0;
        let mut part_number: i32 = 1;

        loop {
            if observer.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            let chunk = read_chunk(&mut file, PART_SIZE).await?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len() as u64;

            let output = self
                .client
                .upload_part()
                .bucket(&self.config.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| StorageError::upload_failed(format!("part {}: {}", part_number, e)))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            sent += len;
            observer.on_progress(sent, total);
            part_number += 1;
        }

        Ok(parts)
    }

    async fn fetch_into(&self, key: &str, dest: &Path, observer: &dyn TransferObserver) -> StorageResult<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false);
                if missing {
                    StorageError::not_found(key)
                } else {
                    StorageError::download_failed(e.to_string())
                }
            })?;

        let total = response.content_length().unwrap_or(0).max(0) as u64;
        let mut body = response.body;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        observer.on_progress(0, total);

        while let Some(chunk) = body.next().await {
            if observer.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            let chunk = chunk.map_err(|e| StorageError::download_failed(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            observer.on_progress(written, total.max(written));
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn backend(&self) -> &'static str {
        "s3"
    }

    async fn upload(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
        observer: &dyn TransferObserver,
    ) -> StorageResult<StoredObject> {
        validate_key(key)?;
        if observer.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let total = tokio::fs::metadata(path).await?.len();
        debug!(key, bytes = total, "Uploading {}", path.display());
        observer.on_progress(0, total);

        if total as usize <= PART_SIZE {
            self.put_single(path, key, content_type, total, observer).await?;
        } else {
            self.put_multipart(path, key, content_type, total, observer).await?;
        }

        let url = self.url_for(key).await?;
        info!(key, bytes = total, "Uploaded {}", path.display());
        Ok(StoredObject {
            key: key.to_string(),
            url,
        })
    }

    async fn fetch(&self, location: &str, dest: &Path, observer: &dyn TransferObserver) -> StorageResult<u64> {
        let key = self
            .key_from_location(location)
            .ok_or_else(|| StorageError::invalid_key(location))?;
        debug!(key = %key, "Downloading to {}", dest.display());

        match self.fetch_into(&key, dest, observer).await {
            Ok(bytes) => {
                info!(key = %key, bytes, "Downloaded to {}", dest.display());
                Ok(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(dest).await;
                Err(e)
            }
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!("Deleting {}", key);

        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(())
    }

    async fn url_for(&self, key: &str) -> StorageResult<String> {
        if self.config.public_urls {
            Ok(self.public_url(key))
        } else {
            self.presign_get(key).await
        }
    }

    async fn readable_location(&self, location: &str) -> StorageResult<String> {
        let key = self
            .key_from_location(location)
            .ok_or_else(|| StorageError::invalid_key(location))?;
        self.presign_get(&key).await
    }

    fn key_from_location(&self, location: &str) -> Option<String> {
        key_from_url(&self.config.object_base_url(), location)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("S3 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

/// Extract the object key from a bare key, a public object URL or a presigned URL.
pub fn key_from_url(base_url: &str, location: &str) -> Option<String> {
    if !location.contains("://") {
        return validate_key(location).ok().map(|_| location.to_string());
    }

    let mut parsed = url::Url::parse(location).ok()?;
    parsed.set_query(None);
    parsed.set_fragment(None);

    let prefix = format!("{}/", base_url.trim_end_matches('/'));
    let key = parsed.as_str().strip_prefix(&prefix)?;
    validate_key(key).ok()?;
    Some(key.to_string())
}

async fn read_chunk(file: &mut tokio::fs::File, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_presigned_url() {
        let base = "https://media.s3.us-east-1.amazonaws.com";
        let url = "https://media.s3.us-east-1.amazonaws.com/videos/j1/video_j1.mp4?X-Amz-Signature=abc&X-Amz-Expires=3600";
        assert_eq!(key_from_url(base, url).as_deref(), Some("videos/j1/video_j1.mp4"));
    }

    #[test]
    fn test_key_from_path_style_url() {
        let base = "http://minio:9000/media";
        let url = "http://minio:9000/media/thumbnails/j1/thumbnail_j1.jpg";
        assert_eq!(key_from_url(base, url).as_deref(), Some("thumbnails/j1/thumbnail_j1.jpg"));
    }

    #[test]
    fn test_key_from_foreign_url() {
        let base = "https://media.s3.us-east-1.amazonaws.com";
        assert_eq!(key_from_url(base, "https://other.example.com/videos/a.mp4"), None);
        assert_eq!(key_from_url(base, "videos/a.mp4").as_deref(), Some("videos/a.mp4"));
        assert_eq!(key_from_url(base, "../a.mp4"), None);
    }

    #[tokio::test]
    async fn test_read_chunk_splits_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        tokio::fs::write(&path, vec![7u8; 10]).await.unwrap();
        let mut file = tokio::fs::File::open(&path).await.unwrap();
        assert_eq!(read_chunk(&mut file, 4).await.unwrap().len(), 4);
        assert_eq!(read_chunk(&mut file, 4).await.unwrap().len(), 4);
        assert_eq!(read_chunk(&mut file, 4).await.unwrap().len(), 2);
        assert!(read_chunk(&mut file, 4).await.unwrap().is_empty());
    }
}
