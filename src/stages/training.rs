//! Model training: epoch loop with a hard stop on divergence.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info};

use crate::config::{PipelineConfig, RunPaths};
use crate::dataset::{BatchLoader, DatasetManifest};
use crate::detector::{self, LossBreakdown, SgdOptimizer};
use crate::domain::{TrainingArtifact, TransformationArtifact};
use crate::error::{DivergenceError, Stage, StageError, StageResultExt};

pub struct TrainingStage {
    config: Arc<PipelineConfig>,
    paths: RunPaths,
}

impl TrainingStage {
    pub fn new(config: Arc<PipelineConfig>, paths: RunPaths) -> Self {
        Self { config, paths }
    }

    /// Train a fresh detector and persist its checkpoint. Divergence is not
    /// a recoverable stage failure: it logs and terminates the process.
    pub async fn run(
        &self,
        transformation: &TransformationArtifact,
    ) -> Result<TrainingArtifact, StageError> {
        let config = Arc::clone(&self.config);
        let train_manifest = transformation.train_object_path.clone();
        let class_count = transformation.class_count;
        let model_path = self.paths.trained_model_path();

        let result = tokio::task::spawn_blocking(move || {
            fit(&config, &train_manifest, class_count, &model_path)
        })
        .await
        .map_err(anyhow::Error::from)
        .in_stage(Stage::Training)?;

        match result {
            Ok(artifact) => Ok(artifact),
            Err(err) if err.downcast_ref::<DivergenceError>().is_some() => {
                error!(error = %err, "training diverged, aborting");
                std::process::exit(1);
            }
            Err(err) => Err(StageError::new(Stage::Training, err)),
        }
    }
}

/// The training loop proper, synchronous and CPU-bound.
pub(crate) fn fit(
    config: &PipelineConfig,
    train_manifest: &Path,
    class_count: usize,
    model_path: &Path,
) -> Result<TrainingArtifact> {
    info!(class_count, epochs = config.epochs, "starting model training");

    let dataset = DatasetManifest::open(train_manifest)?;
    let mut detector = detector::pretrained(class_count);
    let mut optimizer = SgdOptimizer::for_detector(detector.parameter_count());

    for epoch in 1..=config.epochs {
        let loader = if config.shuffle {
            BatchLoader::shuffled(
                &dataset,
                config.batch_size,
                config.num_workers,
                config.seed.wrapping_add(epoch as u64),
            )
        } else {
            BatchLoader::new(&dataset, config.batch_size, config.num_workers)
        };

        let mut epoch_sum = LossBreakdown::default();
        let mut batches = 0usize;
        for batch in loader.iter() {
            let loss = detector.train_step(&batch?, &mut optimizer)?;
            if !loss.is_finite() {
                return Err(anyhow::Error::new(DivergenceError {
                    batch: batches,
                    loss: loss.total(),
                })
                .context(format!("training diverged in epoch {epoch}")));
            }
            debug!(epoch, batch = batches, loss = loss.total(), "batch trained");
            epoch_sum.accumulate(&loss);
            batches += 1;
        }

        let mean = epoch_sum.scaled(1.0 / batches.max(1) as f32);
        info!(
            epoch,
            lr = optimizer.learning_rate,
            loss = mean.total(),
            loss_classifier = mean.classifier,
            loss_box_reg = mean.box_reg,
            loss_rpn_box_reg = mean.rpn_box_reg,
            loss_objectness = mean.objectness,
            "epoch complete"
        );
    }

    detector.checkpoint().save(model_path)?;
    info!(model = %model_path.display(), "model training complete");

    Ok(TrainingArtifact {
        model_path: model_path.to_path_buf(),
    })
}
