//! End-to-end pipelines.
//!
//! [`TrainPipeline`] chains the five stages strictly sequentially; each
//! stage's artifact feeds the next. The chain short-circuits on the first
//! stage error and never reaches promotion when evaluation rejects.

pub mod prediction;

use std::sync::Arc;

use tracing::info;

use crate::config::{PipelineConfig, RunPaths};
use crate::domain::{PipelineOutcome, RunId};
use crate::error::StageError;
use crate::stages::{
    EvaluationStage, IngestionStage, PromotionStage, TrainingStage, TransformationStage,
};
use crate::storage::StorageGateway;

pub use prediction::PredictionPipeline;

pub struct TrainPipeline {
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn StorageGateway>,
}

impl TrainPipeline {
    pub fn new(config: Arc<PipelineConfig>, gateway: Arc<dyn StorageGateway>) -> Self {
        Self { config, gateway }
    }

    /// Execute one full run under a fresh timestamped run id.
    pub async fn run(&self) -> Result<PipelineOutcome, StageError> {
        self.run_with_id(&RunId::now()).await
    }

    pub async fn run_with_id(&self, run_id: &RunId) -> Result<PipelineOutcome, StageError> {
        info!(run = %run_id, "starting training pipeline");
        let paths = RunPaths::new(&self.config.artifact_root, run_id);

        let ingestion = IngestionStage::new(
            Arc::clone(&self.config),
            Arc::clone(&self.gateway),
            paths.clone(),
        )
        .run()
        .await?;

        let transformation = TransformationStage::new(Arc::clone(&self.config), paths.clone())
            .run(&ingestion)
            .await?;

        let training = TrainingStage::new(Arc::clone(&self.config), paths.clone())
            .run(&transformation)
            .await?;

        let evaluation = EvaluationStage::new(
            Arc::clone(&self.config),
            Arc::clone(&self.gateway),
            paths.clone(),
        )
        .run(&transformation, &training)
        .await?;

        if !evaluation.is_accepted {
            info!(
                run = %run_id,
                metric = evaluation.metric_value,
                "trained model rejected, keeping deployed model"
            );
            return Ok(PipelineOutcome::Rejected {
                reason: "trained model is not better than the deployed model".to_string(),
                evaluation,
            });
        }

        let promotion = PromotionStage::new(Arc::clone(&self.config), Arc::clone(&self.gateway))
            .run(&training)
            .await?;

        info!(run = %run_id, metric = evaluation.metric_value, "training pipeline complete");
        Ok(PipelineOutcome::Accepted {
            evaluation,
            promotion,
        })
    }
}
