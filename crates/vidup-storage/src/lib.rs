//! Object storage collaborator.
//!
//! This crate provides:
//! - The `ObjectStore` seam used by the orchestrator
//! - An S3 implementation with multipart upload, progress and abort
//! - A local directory implementation
//! - Object key layout helpers

pub mod config;
pub mod error;
pub mod keys;
pub mod local;
pub mod s3;
pub mod store;

use std::sync::Arc;

pub use config::{S3Config, StorageBackend, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use local::LocalStore;
pub use s3::S3Store;
pub use store::{NoopObserver, ObjectStore, StoredObject, TransferObserver};

/// Build the configured backend.
pub async fn connect(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::S3 => Ok(Arc::new(S3Store::new(config.s3.clone()).await?)),
        StorageBackend::Local => Ok(Arc::new(LocalStore::new(&config.local_dir).await?)),
    }
}
