//! S3-compatible HTTP gateway.
//!
//! Talks path-style (`{endpoint}/{bucket}/{key}`) to an S3-compatible object
//! store. Credentials are read from `AWS_ACCESS_KEY_ID` and
//! `AWS_SECRET_ACCESS_KEY` once at construction and cached for the process
//! lifetime; a missing variable is a fatal configuration error.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};

use super::{StorageError, StorageGateway};

/// Environment variable holding the credential id.
pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";

/// Environment variable holding the secret key.
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

pub struct S3Gateway {
    http: reqwest::Client,
    endpoint: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl S3Gateway {
    /// Build a gateway from the process environment.
    pub fn from_env(endpoint: String, region: String) -> Result<Self, StorageError> {
        let access_key = std::env::var(ACCESS_KEY_ENV)
            .map_err(|_| StorageError::MissingCredential {
                name: ACCESS_KEY_ENV,
            })?;
        let secret_key = std::env::var(SECRET_KEY_ENV)
            .map_err(|_| StorageError::MissingCredential {
                name: SECRET_KEY_ENV,
            })?;

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region,
            access_key,
            secret_key,
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key)
    }
}

#[async_trait]
impl StorageGateway for S3Gateway {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        bucket: &str,
        remove_local: bool,
    ) -> Result<(), StorageError> {
        info!(
            local = %local_path.display(),
            key,
            bucket,
            "uploading object"
        );

        let body = tokio::fs::read(local_path).await?;
        let response = self
            .http
            .put(self.object_url(bucket, key))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .header("x-amz-region", &self.region)
            .body(body)
            .send()
            .await
            .map_err(|source| StorageError::Transport {
                key: key.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(StorageError::UnexpectedStatus {
                key: key.to_string(),
                status: response.status(),
            });
        }

        if remove_local {
            debug!(local = %local_path.display(), "removing local source after upload");
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
        info!(key, bucket, dest = %dest_path.display(), "downloading object");

        let response = self
            .http
            .get(self.object_url(bucket, key))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .header("x-amz-region", &self.region)
            .send()
            .await
            .map_err(|source| StorageError::Transport {
                key: key.to_string(),
                source,
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                key: key.to_string(),
                bucket: bucket.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(StorageError::UnexpectedStatus {
                key: key.to_string(),
                status: response.status(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| StorageError::Transport {
                key: key.to_string(),
                source,
            })?;

        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest_path, &bytes).await?;

        Ok(dest_path.to_path_buf())
    }
}
