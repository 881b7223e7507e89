//! Storage configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{StorageError, StorageResult};

/// Which backend serves objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Local,
}

impl std::str::FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "local" => Ok(Self::Local),
            other => Err(StorageError::config_error(format!(
                "unknown STORAGE_BACKEND '{}', expected 's3' or 'local'",
                other
            ))),
        }
    }
}

/// S3-compatible bucket settings.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Static credentials; the default AWS provider chain is used when unset.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom endpoint (MinIO, R2, ...). Enables path-style addressing.
    pub endpoint_url: Option<String>,
    /// Lifetime of presigned URLs.
    pub url_expiration: Duration,
    /// Issue plain object URLs instead of presigned ones.
    pub public_urls: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            url_expiration: Duration::from_secs(3600),
            public_urls: false,
        }
    }
}

impl S3Config {
    /// Base URL objects are addressed under, without trailing slash.
    pub fn object_base_url(&self) -> String {
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3: S3Config,
    /// Root directory of the local backend.
    pub local_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            s3: S3Config::default(),
            local_dir: PathBuf::from("./tmp/storage"),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let defaults = Self::default();
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let s3 = S3Config {
            bucket: non_empty("S3_BUCKET").unwrap_or_default(),
            region: non_empty("S3_REGION").unwrap_or(defaults.s3.region),
            access_key_id: non_empty("AWS_ACCESS_KEY_ID"),
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY"),
            endpoint_url: non_empty("S3_ENDPOINT_URL"),
            url_expiration: std::env::var("S3_URL_EXPIRATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.s3.url_expiration),
            public_urls: std::env::var("S3_PUBLIC_URLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };

        // S3 when a bucket is configured, unless told otherwise
        let backend = match non_empty("STORAGE_BACKEND") {
            Some(name) => name.parse()?,
            None if !s3.bucket.is_empty() => StorageBackend::S3,
            None => StorageBackend::Local,
        };

        if backend == StorageBackend::S3 && s3.bucket.is_empty() {
            return Err(StorageError::config_error("S3_BUCKET not set"));
        }

        Ok(Self {
            backend,
            s3,
            local_dir: non_empty("LOCAL_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_dir),
        })
    }
}
