//! Object-storage gateway for dataset archives and model checkpoints.
//!
//! The gateway is constructed once at process start and injected into every
//! stage that touches remote storage; there is no hidden global connection.
//! Transport and credential failures are fatal for the containing stage —
//! no retry, no backoff.

pub mod local;
pub mod s3;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalGateway;
pub use s3::S3Gateway;

use crate::config::PipelineConfig;

/// Errors raised by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("environment variable {name} is not set")]
    MissingCredential { name: &'static str },

    #[error("transfer of '{key}' failed: {source}")]
    Transport {
        key: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("object store returned {status} for '{key}'")]
    UnexpectedStatus {
        key: String,
        status: reqwest::StatusCode,
    },

    #[error("object '{key}' not found in bucket '{bucket}'")]
    NotFound { key: String, bucket: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Uniform interface to upload and download named blobs.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Upload a local file to `bucket` under `key`. With `remove_local`,
    /// the source file is deleted after a successful upload (used for
    /// intermediate artifacts; promoted checkpoints keep their local copy).
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        bucket: &str,
        remove_local: bool,
    ) -> Result<(), StorageError>;

    /// Download `key` from `bucket` into `dest_path`, creating parent
    /// directories as needed. Returns the destination path.
    async fn download(
        &self,
        key: &str,
        bucket: &str,
        dest_path: &Path,
    ) -> Result<PathBuf, StorageError>;
}

/// Build the gateway matching the configured endpoint.
///
/// `file://<path>` endpoints select the directory-backed gateway; anything
/// else is treated as an S3-compatible HTTP endpoint with credentials taken
/// from the process environment exactly once.
pub fn connect(config: &PipelineConfig) -> Result<Arc<dyn StorageGateway>, StorageError> {
    if let Some(root) = config.endpoint.strip_prefix("file://") {
        Ok(Arc::new(LocalGateway::new(PathBuf::from(root))))
    } else {
        Ok(Arc::new(S3Gateway::from_env(
            config.endpoint.clone(),
            config.region.clone(),
        )?))
    }
}
