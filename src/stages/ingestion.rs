//! Data ingestion: fetch the dataset archive and unpack the splits.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{PipelineConfig, RunPaths, ARCHIVE_KEY};
use crate::domain::IngestionArtifact;
use crate::error::{Stage, StageError, StageResultExt};
use crate::storage::StorageGateway;

pub struct IngestionStage {
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn StorageGateway>,
    paths: RunPaths,
}

impl IngestionStage {
    pub fn new(
        config: Arc<PipelineConfig>,
        gateway: Arc<dyn StorageGateway>,
        paths: RunPaths,
    ) -> Self {
        Self {
            config,
            gateway,
            paths,
        }
    }

    pub async fn run(&self) -> Result<IngestionArtifact, StageError> {
        self.fetch_and_extract().await.in_stage(Stage::Ingestion)
    }

    async fn fetch_and_extract(&self) -> Result<IngestionArtifact> {
        info!(
            bucket = %self.config.bucket,
            key = ARCHIVE_KEY,
            "starting data ingestion"
        );

        let ingestion_dir = self.paths.ingestion_dir();
        tokio::fs::create_dir_all(&ingestion_dir).await?;

        let archive = self.paths.archive_path();
        self.gateway
            .download(ARCHIVE_KEY, &self.config.bucket, &archive)
            .await?;

        let dest = ingestion_dir.clone();
        let archive_path = archive.clone();
        tokio::task::spawn_blocking(move || extract_archive(&archive_path, &dest)).await??;

        let artifact = IngestionArtifact {
            train_path: self.paths.train_dir(),
            test_path: self.paths.test_dir(),
            valid_path: self.paths.valid_dir(),
        };
        for split in [
            &artifact.train_path,
            &artifact.test_path,
            &artifact.valid_path,
        ] {
            anyhow::ensure!(
                split.is_dir(),
                "archive is missing split directory {}",
                split.display()
            );
        }

        info!(dir = %ingestion_dir.display(), "data ingestion complete");
        Ok(artifact)
    }
}

fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)
        .with_context(|| format!("failed to open archive: {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("archive is not a zip file: {}", archive.display()))?;
    zip.extract(dest)
        .with_context(|| format!("failed to extract archive into {}", dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::storage::LocalGateway;

    /// Build a data.zip with the three split directories, each holding an
    /// empty annotation file.
    fn write_archive(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for split in ["train", "test", "valid"] {
            zip.add_directory(split, options).unwrap();
            zip.start_file(format!("{split}/_annotations.coco.json"), options)
                .unwrap();
            zip.write_all(br#"{"images":[],"annotations":[],"categories":[]}"#)
                .unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn test_ingestion_downloads_and_extracts_splits() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("store");
        let config = Arc::new(PipelineConfig::default());

        let bucket_dir = store.join(&config.bucket);
        std::fs::create_dir_all(&bucket_dir).unwrap();
        write_archive(&bucket_dir.join(ARCHIVE_KEY));

        let gateway = Arc::new(LocalGateway::new(store));
        let paths = RunPaths::new(&dir.path().join("artifacts"), &crate::domain::RunId::now());
        let stage = IngestionStage::new(config, gateway, paths.clone());

        let artifact = stage.run().await.unwrap();

        assert!(artifact.train_path.is_dir());
        assert!(artifact.test_path.is_dir());
        assert!(artifact.valid_path.is_dir());
        assert!(paths.archive_path().is_file());
    }

    #[tokio::test]
    async fn test_missing_archive_fails_in_ingestion_stage() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(LocalGateway::new(dir.path().join("store")));
        let config = Arc::new(PipelineConfig::default());
        let paths = RunPaths::new(&dir.path().join("artifacts"), &crate::domain::RunId::now());

        let err = IngestionStage::new(config, gateway, paths)
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Ingestion);
    }
}
