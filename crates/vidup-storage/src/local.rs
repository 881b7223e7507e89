//! Local directory object store.
//!
//! Objects live under a root directory and are addressed by `file://` URLs.
//! Used for single-host deployments and for tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::keys::validate_key;
use crate::store::{ObjectStore, StoredObject, TransferObserver};

const COPY_CHUNK: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create the store, creating `root` if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        tokio::fs::create_dir_all(root).await?;
        let root = tokio::fs::canonicalize(root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of a key.
    pub fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn url_of(&self, key: &str) -> StorageResult<String> {
        let path = self.path_for(key)?;
        url::Url::from_file_path(&path)
            .map(|u| u.to_string())
            .map_err(|_| StorageError::invalid_key(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn upload(
        &self,
        path: &Path,
        key: &str,
        _content_type: &str,
        observer: &dyn TransferObserver,
    ) -> StorageResult<StoredObject> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match copy_observed(path, &dest, observer).await {
            Ok(bytes) => {
                info!(key, bytes, "Stored {}", path.display());
                Ok(StoredObject {
                    key: key.to_string(),
                    url: self.url_of(key)?,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&dest).await;
                Err(e)
            }
        }
    }

    async fn fetch(&self, location: &str, dest: &Path, observer: &dyn TransferObserver) -> StorageResult<u64> {
        let key = self
            .key_from_location(location)
            .ok_or_else(|| StorageError::invalid_key(location))?;
        let source = self.path_for(&key)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(StorageError::not_found(key));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(key = %key, "Fetching to {}", dest.display());

        match copy_observed(&source, dest, observer).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                let _ = tokio::fs::remove_file(dest).await;
                Err(e)
            }
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::delete_failed(e.to_string())),
        }
    }

    async fn url_for(&self, key: &str) -> StorageResult<String> {
        self.url_of(key)
    }

    async fn readable_location(&self, location: &str) -> StorageResult<String> {
        let key = self
            .key_from_location(location)
            .ok_or_else(|| StorageError::invalid_key(location))?;
        Ok(self.path_for(&key)?.to_string_lossy().to_string())
    }

    fn key_from_location(&self, location: &str) -> Option<String> {
        let path = if location.starts_with("file://") {
            url::Url::parse(location).ok()?.to_file_path().ok()?
        } else if Path::new(location).is_absolute() {
            PathBuf::from(location)
        } else {
            return validate_key(location).ok().map(|_| location.to_string());
        };

        let rel = path.strip_prefix(&self.root).ok()?;
        let key = rel.to_str()?.to_string();
        validate_key(&key).ok()?;
        Some(key)
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        let meta = tokio::fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(StorageError::config_error(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

async fn copy_observed(from: &Path, to: &Path, observer: &dyn TransferObserver) -> StorageResult<u64> {
    let mut src = tokio::fs::File::open(from).await?;
    let total = src.metadata().await?.len();
    let mut dst = tokio::fs::File::create(to).await?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut copied: u64 = 0;

    observer.on_progress(0, total);
    loop {
        if observer.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
        copied += n as u64;
        observer.on_progress(copied, total.max(copied));
    }
    dst.flush().await?;
    Ok(copied)
}
