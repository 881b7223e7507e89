//! The storage collaborator seam.

use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageResult;

/// Receives byte progress of a transfer and can stop it.
///
/// Implementations are called from inside the transfer loop and must not block.
pub trait TransferObserver: Send + Sync {
    fn on_progress(&self, transferred: u64, total: u64);

    /// Checked between chunks; `true` aborts the transfer with [`crate::StorageError::Cancelled`].
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Observer that ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {
    fn on_progress(&self, _transferred: u64, _total: u64) {}
}

/// An uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    /// Client-facing URL, resolved at upload time.
    pub url: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs and health checks.
    fn backend(&self) -> &'static str;

    /// Upload a local file. A cancelled or failed upload leaves no object behind.
    async fn upload(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
        observer: &dyn TransferObserver,
    ) -> StorageResult<StoredObject>;

    /// Fetch an object, addressed by key or by a URL this store issued, into `dest`.
    /// Returns the number of bytes written. `dest` is removed on failure.
    async fn fetch(&self, location: &str, dest: &Path, observer: &dyn TransferObserver) -> StorageResult<u64>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Client-facing URL for a key.
    async fn url_for(&self, key: &str) -> StorageResult<String>;

    /// Location an external tool can read directly (URL or filesystem path).
    async fn readable_location(&self, location: &str) -> StorageResult<String>;

    /// Key of a location this store issued, if it can be recognised.
    fn key_from_location(&self, location: &str) -> Option<String>;

    async fn check_connectivity(&self) -> StorageResult<()>;
}
