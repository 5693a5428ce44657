//! Model evaluation: score the trained and deployed checkpoints on the test
//! view and decide promotion.
//!
//! Evaluation is forward-only. The decision rule is strict: the trained
//! model is accepted only when the deployed model's mean loss is greater
//! than the trained model's; a tie keeps the deployed model.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::config::{PipelineConfig, RunPaths, DEPLOYED_MODEL_KEY};
use crate::dataset::{BatchLoader, DatasetManifest, DatasetView};
use crate::detector::{self, Detector, LossBreakdown};
use crate::domain::{EvaluationArtifact, TrainingArtifact, TransformationArtifact};
use crate::error::{DivergenceError, Stage, StageError};
use crate::storage::StorageGateway;

pub struct EvaluationStage {
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn StorageGateway>,
    paths: RunPaths,
}

impl EvaluationStage {
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

    /// Score both checkpoints and decide promotion. Divergence during the
    /// forward passes terminates the process, same as in training.
    pub async fn run(
        &self,
        transformation: &TransformationArtifact,
        training: &TrainingArtifact,
    ) -> Result<EvaluationArtifact, StageError> {
        match self.evaluate(transformation, training).await {
            Ok(artifact) => Ok(artifact),
            Err(err) if err.downcast_ref::<DivergenceError>().is_some() => {
                error!(error = %err, "evaluation diverged, aborting");
                std::process::exit(1);
            }
            Err(err) => Err(StageError::new(Stage::Evaluation, err)),
        }
    }

    async fn evaluate(
        &self,
        transformation: &TransformationArtifact,
        training: &TrainingArtifact,
    ) -> Result<EvaluationArtifact> {
        info!("starting model evaluation");
        tokio::fs::create_dir_all(self.paths.evaluation_dir()).await?;

        // a missing deployed checkpoint is fatal; the bucket is seeded by
        // the operator before the first run
        let deployed_path = self
            .gateway
            .download(
                DEPLOYED_MODEL_KEY,
                &self.config.bucket,
                &self.paths.deployed_model_path(),
            )
            .await?;

        let config = Arc::clone(&self.config);
        let test_manifest = transformation.test_object_path.clone();
        let trained_path = training.model_path.clone();
        let loss_csv = self.paths.loss_csv_path();

        let artifact = tokio::task::spawn_blocking(move || {
            compare(&config, &test_manifest, &trained_path, &deployed_path, &loss_csv)
        })
        .await??;

        Ok(artifact)
    }
}

/// Score both checkpoints on the same test view and apply the decision rule.
pub(crate) fn compare(
    config: &PipelineConfig,
    test_manifest: &Path,
    trained_path: &Path,
    deployed_path: &Path,
    loss_csv: &Path,
) -> Result<EvaluationArtifact> {
    let dataset = DatasetManifest::open(test_manifest)?;
    let trained = detector::load_detector(trained_path)?;
    let deployed = detector::load_detector(deployed_path)?;

    let (trained_loss, rows) = mean_loss(config, &dataset, trained.as_ref())?;
    write_loss_csv(loss_csv, &rows)?;
    let (deployed_loss, _) = mean_loss(config, &dataset, deployed.as_ref())?;

    let is_accepted = deployed_loss > trained_loss;
    // rejected runs report the model that stays deployed
    let metric_value = if is_accepted { trained_loss } else { deployed_loss };

    info!(
        trained_loss,
        deployed_loss, is_accepted, "model evaluation complete"
    );

    Ok(EvaluationArtifact {
        is_accepted,
        metric_value,
    })
}

fn mean_loss(
    config: &PipelineConfig,
    dataset: &dyn DatasetView,
    detector: &dyn Detector,
) -> Result<(f32, Vec<LossBreakdown>)> {
    let loader = BatchLoader::new(dataset, config.eval_batch_size, config.num_workers);

    let mut rows = Vec::with_capacity(loader.batch_count());
    for batch in loader.iter() {
        let loss = detector.forward_loss(&batch?)?;
        if !loss.is_finite() {
            return Err(DivergenceError {
                batch: rows.len(),
                loss: loss.total(),
            }
            .into());
        }
        rows.push(loss);
    }
    anyhow::ensure!(!rows.is_empty(), "test view produced no batches");

    let mut sum = LossBreakdown::default();
    for row in &rows {
        sum.accumulate(row);
    }
    Ok((sum.scaled(1.0 / rows.len() as f32).total(), rows))
}

fn write_loss_csv(path: &Path, rows: &[LossBreakdown]) -> Result<()> {
    use std::fmt::Write as _;

    let mut out = String::from(
        "batch,loss_classifier,loss_box_reg,loss_rpn_box_reg,loss_objectness,total\n",
    );
    for (i, row) in rows.iter().enumerate() {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            i,
            row.classifier,
            row.box_reg,
            row.rpn_box_reg,
            row.objectness,
            row.total()
        )?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::write_split;
    use crate::dataset::{CocoDataset, TransformPipeline};
    use crate::detector::GridDetector;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: PipelineConfig,
        test_manifest: std::path::PathBuf,
        trained_path: std::path::PathBuf,
        deployed_path: std::path::PathBuf,
        loss_csv: std::path::PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let split = dir.path().join("test");
        write_split(&split, 4, 4);

        let dataset = CocoDataset::open(&split, TransformPipeline::evaluation(32), 7).unwrap();
        let test_manifest = dir.path().join("test.json");
        DatasetManifest::describe(&dataset).save(&test_manifest).unwrap();

        let fixture = Fixture {
            config: PipelineConfig {
                eval_batch_size: 1,
                num_workers: 1,
                ..Default::default()
            },
            test_manifest,
            trained_path: dir.path().join("trained.json"),
            deployed_path: dir.path().join("deployed.json"),
            loss_csv: dir.path().join("eval/loss.csv"),
            _dir: dir,
        };

        GridDetector::pretrained(2)
            .checkpoint()
            .save(&fixture.trained_path)
            .unwrap();
        fixture
    }

    fn run_compare(f: &Fixture) -> EvaluationArtifact {
        compare(
            &f.config,
            &f.test_manifest,
            &f.trained_path,
            &f.deployed_path,
            &f.loss_csv,
        )
        .unwrap()
    }

    #[test]
    fn test_identical_models_tie_and_reject() {
        let f = fixture();
        // deployed is byte-equivalent to trained: losses tie exactly
        std::fs::copy(&f.trained_path, &f.deployed_path).unwrap();

        let artifact = run_compare(&f);

        assert!(!artifact.is_accepted);
        assert!(artifact.metric_value.is_finite());
    }

    #[test]
    fn test_worse_deployed_model_is_replaced() {
        let f = fixture();
        // saturate the deployed weights so its cross-entropy blows up
        let mut checkpoint = GridDetector::pretrained(2).checkpoint();
        for p in &mut checkpoint.params {
            *p = 50.0;
        }
        checkpoint.save(&f.deployed_path).unwrap();

        let artifact = run_compare(&f);

        assert!(artifact.is_accepted);
    }

    #[test]
    fn test_rejection_reports_deployed_metric() {
        let f = fixture();
        std::fs::copy(&f.trained_path, &f.deployed_path).unwrap();

        let artifact = run_compare(&f);
        let dataset = DatasetManifest::open(&f.test_manifest).unwrap();
        let deployed = detector::load_detector(&f.deployed_path).unwrap();
        let (deployed_loss, _) = mean_loss(&f.config, &dataset, deployed.as_ref()).unwrap();

        assert!((artifact.metric_value - deployed_loss).abs() < 1e-6);
    }

    struct DivergingDetector;

    impl Detector for DivergingDetector {
        fn class_count(&self) -> usize {
            2
        }

        fn parameter_count(&self) -> usize {
            0
        }

        fn forward_loss(&self, _: &crate::dataset::Batch) -> Result<LossBreakdown> {
            Ok(LossBreakdown {
                classifier: f32::NAN,
                ..Default::default()
            })
        }

        fn train_step(
            &mut self,
            _: &crate::dataset::Batch,
            _: &mut crate::detector::SgdOptimizer,
        ) -> Result<LossBreakdown> {
            self.forward_loss(&crate::dataset::Batch {
                images: vec![],
                targets: vec![],
            })
        }

        fn predict(&self, _: &ndarray::Array3<f32>) -> Result<Vec<crate::detector::Detection>> {
            Ok(vec![])
        }

        fn checkpoint(&self) -> crate::detector::Checkpoint {
            crate::detector::Checkpoint {
                version: 1,
                arch: "stub".to_string(),
                class_count: 2,
                params: vec![],
                created_at: chrono::Utc::now(),
            }
        }
    }

    #[test]
    fn test_non_finite_loss_stops_the_pass_at_its_batch() {
        let f = fixture();
        let dataset = DatasetManifest::open(&f.test_manifest).unwrap();

        let err = mean_loss(&f.config, &dataset, &DivergingDetector).unwrap_err();

        let divergence = err
            .downcast_ref::<DivergenceError>()
            .expect("divergence surfaces as its own error type");
        assert_eq!(divergence.batch, 0);
    }

    #[test]
    fn test_loss_csv_written_per_batch() {
        let f = fixture();
        std::fs::copy(&f.trained_path, &f.deployed_path).unwrap();

        run_compare(&f);

        let csv = std::fs::read_to_string(&f.loss_csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        // header plus one row per eval batch (batch size 1, 4 items)
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("batch,loss_classifier"));
    }
}
