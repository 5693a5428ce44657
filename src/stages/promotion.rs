//! Model promotion: publish the accepted checkpoint at the deployed key.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::{PipelineConfig, DEPLOYED_MODEL_KEY};
use crate::domain::{PromotionArtifact, TrainingArtifact};
use crate::error::{Stage, StageError, StageResultExt};
use crate::storage::StorageGateway;

pub struct PromotionStage {
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn StorageGateway>,
}

impl PromotionStage {
    pub fn new(config: Arc<PipelineConfig>, gateway: Arc<dyn StorageGateway>) -> Self {
        Self { config, gateway }
    }

    /// Overwrite the deployed checkpoint with the trained one. The local
    /// copy stays in the run's artifact tree.
    pub async fn run(&self, training: &TrainingArtifact) -> Result<PromotionArtifact, StageError> {
        self.push(training).await.in_stage(Stage::Promotion)
    }

    async fn push(&self, training: &TrainingArtifact) -> Result<PromotionArtifact> {
        self.gateway
            .upload(
                &training.model_path,
                DEPLOYED_MODEL_KEY,
                &self.config.bucket,
                false,
            )
            .await?;

        info!(
            bucket = %self.config.bucket,
            key = DEPLOYED_MODEL_KEY,
            "model promotion complete"
        );

        Ok(PromotionArtifact {
            bucket_name: self.config.bucket.clone(),
            remote_model_key: DEPLOYED_MODEL_KEY.to_string(),
        })
    }
}
