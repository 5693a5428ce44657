//! Data transformation: build augmented train and resize-only test views.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::{PipelineConfig, RunPaths};
use crate::dataset::{CocoDataset, DatasetManifest, DatasetView, TransformPipeline};
use crate::domain::{IngestionArtifact, TransformationArtifact};
use crate::error::{Stage, StageError, StageResultExt};

pub struct TransformationStage {
    config: Arc<PipelineConfig>,
    paths: RunPaths,
}

impl TransformationStage {
    pub fn new(config: Arc<PipelineConfig>, paths: RunPaths) -> Self {
        Self { config, paths }
    }

    pub async fn run(
        &self,
        ingestion: &IngestionArtifact,
    ) -> Result<TransformationArtifact, StageError> {
        self.build_views(ingestion).in_stage(Stage::Transformation)
    }

    fn build_views(&self, ingestion: &IngestionArtifact) -> Result<TransformationArtifact> {
        info!("starting data transformation");

        let train_pipeline =
            TransformPipeline::training(self.config.input_size, &self.config.augment);
        let train = CocoDataset::open(&ingestion.train_path, train_pipeline, self.config.seed)?;
        anyhow::ensure!(!train.is_empty(), "training split has no annotated images");

        // the detector head is sized from the train annotations only
        let class_count = train.class_count();
        anyhow::ensure!(class_count > 0, "training split declares no categories");

        let test = CocoDataset::open(
            &ingestion.test_path,
            TransformPipeline::evaluation(self.config.input_size),
            self.config.seed,
        )?;
        anyhow::ensure!(!test.is_empty(), "test split has no annotated images");

        let train_object_path = self.paths.train_object_path();
        let test_object_path = self.paths.test_object_path();
        DatasetManifest::describe(&train).save(&train_object_path)?;
        DatasetManifest::describe(&test).save(&test_object_path)?;

        info!(
            class_count,
            train_len = train.len(),
            test_len = test.len(),
            "data transformation complete"
        );

        Ok(TransformationArtifact {
            train_object_path,
            test_object_path,
            class_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::write_split;
    use crate::domain::RunId;

    fn ingestion_fixture(root: &std::path::Path) -> IngestionArtifact {
        let artifact = IngestionArtifact {
            train_path: root.join("train"),
            test_path: root.join("test"),
            valid_path: root.join("valid"),
        };
        write_split(&artifact.train_path, 10, 8);
        write_split(&artifact.test_path, 4, 4);
        write_split(&artifact.valid_path, 2, 2);
        artifact
    }

    #[tokio::test]
    async fn test_transformation_persists_reopenable_views() {
        let dir = tempfile::tempdir().unwrap();
        let ingestion = ingestion_fixture(dir.path());
        let paths = RunPaths::new(&dir.path().join("artifacts"), &RunId::now());
        let stage = TransformationStage::new(Arc::new(PipelineConfig::default()), paths);

        let artifact = stage.run(&ingestion).await.unwrap();

        assert_eq!(artifact.class_count, 2);

        let train = DatasetManifest::open(&artifact.train_object_path).unwrap();
        assert_eq!(train.len(), 8);
        let test = DatasetManifest::open(&artifact.test_object_path).unwrap();
        assert_eq!(test.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_training_split_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ingestion = ingestion_fixture(dir.path());
        // all images unannotated
        write_split(&ingestion.train_path, 3, 0);

        let paths = RunPaths::new(&dir.path().join("artifacts"), &RunId::now());
        let stage = TransformationStage::new(Arc::new(PipelineConfig::default()), paths);

        let err = stage.run(&ingestion).await.unwrap_err();
        assert_eq!(err.stage, Stage::Transformation);
    }
}
