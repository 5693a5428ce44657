//! Directory-backed gateway for local development and tests.
//!
//! Buckets are subdirectories of a root directory; keys are file names
//! within a bucket. Behavior matches the S3 gateway's contract, including
//! the `remove_local` post-upload delete.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{StorageError, StorageGateway};

pub struct LocalGateway {
    root: PathBuf,
}

impl LocalGateway {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl StorageGateway for LocalGateway {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        bucket: &str,
        remove_local: bool,
    ) -> Result<(), StorageError> {
        let dest = self.object_path(bucket, key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(local_path, &dest).await?;
        debug!(key, bucket, "stored object in local bucket");

        if remove_local {
            tokio::fs::remove_file(local_path).await?;
        }
        Ok(())
    }

    async fn download(
        &self,
        key: &str,
        bucket: &str,
        dest_path: &Path,
    ) -> Result<PathBuf, StorageError> {
        let src = self.object_path(bucket, key);
        if !src.exists() {
            return Err(StorageError::NotFound {
                key: key.to_string(),
                bucket: bucket.to_string(),
            });
        }
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&src, dest_path).await?;
        Ok(dest_path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_with_remove_deletes_source() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = LocalGateway::new(dir.path().join("store"));

        let src = dir.path().join("artifact.bin");
        tokio::fs::write(&src, b"checkpoint").await.unwrap();

        gateway
            .upload(&src, "model.json", "bucket", true)
            .await
            .unwrap();

        assert!(!src.exists());
        assert!(dir.path().join("store/bucket/model.json").exists());
    }

    #[tokio::test]
    async fn test_upload_without_remove_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = LocalGateway::new(dir.path().join("store"));

        let src = dir.path().join("artifact.bin");
        tokio::fs::write(&src, b"checkpoint").await.unwrap();

        gateway
            .upload(&src, "model.json", "bucket", false)
            .await
            .unwrap();

        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_download_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = LocalGateway::new(dir.path().join("store"));

        let result = gateway
            .download("absent.zip", "bucket", &dir.path().join("out.zip"))
            .await;

        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }
}
