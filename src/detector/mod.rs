//! Detector capability interface.
//!
//! The pipeline treats the detector as an opaque capability: it can score a
//! training batch (with a named loss breakdown), take an optimizer step, and
//! predict boxes for a single image. Checkpoints are versioned serde
//! documents loaded back through [`load_detector`]; the concrete network is
//! a pluggable implementation detail behind the [`Detector`] trait.

pub mod grid;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::dataset::Batch;

pub use grid::GridDetector;

/// One predicted box: corners in pixels, remapped label, confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub label: usize,
    pub score: f32,
}

/// Named loss components; total loss is their sum, as in the underlying
/// region-proposal detector family.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub classifier: f32,
    pub box_reg: f32,
    pub rpn_box_reg: f32,
    pub objectness: f32,
}

impl LossBreakdown {
    pub fn total(&self) -> f32 {
        self.classifier + self.box_reg + self.rpn_box_reg + self.objectness
    }

    pub fn is_finite(&self) -> bool {
        self.total().is_finite()
    }

    pub fn accumulate(&mut self, other: &LossBreakdown) {
        self.classifier += other.classifier;
        self.box_reg += other.box_reg;
        self.rpn_box_reg += other.rpn_box_reg;
        self.objectness += other.objectness;
    }

    pub fn scaled(&self, factor: f32) -> LossBreakdown {
        LossBreakdown {
            classifier: self.classifier * factor,
            box_reg: self.box_reg * factor,
            rpn_box_reg: self.rpn_box_reg * factor,
            objectness: self.objectness * factor,
        }
    }
}

/// SGD with momentum over a flat parameter vector.
pub struct SgdOptimizer {
    pub learning_rate: f32,
    pub momentum: f32,
    pub weight_decay: f32,
    pub nesterov: bool,
    velocity: Vec<f32>,
}

impl SgdOptimizer {
    /// The detector optimizer: lr 0.01, momentum 0.9, nesterov, weight
    /// decay 1e-4 over all trainable parameters.
    pub fn for_detector(parameter_count: usize) -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.9,
            weight_decay: 1e-4,
            nesterov: true,
            velocity: vec![0.0; parameter_count],
        }
    }

    /// Apply one update. `params` and `grads` must both match the
    /// parameter count the optimizer was built for.
    pub fn step(&mut self, params: &mut [f32], grads: &[f32]) {
        debug_assert_eq!(params.len(), self.velocity.len());
        debug_assert_eq!(grads.len(), self.velocity.len());

        for i in 0..params.len() {
            let mut d = grads[i] + self.weight_decay * params[i];
            self.velocity[i] = self.momentum * self.velocity[i] + d;
            if self.nesterov {
                d += self.momentum * self.velocity[i];
            } else {
                d = self.velocity[i];
            }
            params[i] -= self.learning_rate * d;
        }
    }
}

/// Narrow capability interface over a trainable detector.
pub trait Detector: Send {
    fn class_count(&self) -> usize;

    fn parameter_count(&self) -> usize;

    /// Forward pass in training-loss mode, no gradients. Used by evaluation.
    fn forward_loss(&self, batch: &Batch) -> Result<LossBreakdown>;

    /// One training step: forward, backward, optimizer update.
    fn train_step(&mut self, batch: &Batch, optimizer: &mut SgdOptimizer)
        -> Result<LossBreakdown>;

    /// Detections for one normalized `(3, H, W)` image, unfiltered.
    fn predict(&self, image: &Array3<f32>) -> Result<Vec<Detection>>;

    /// Snapshot the current parameters as a checkpoint.
    fn checkpoint(&self) -> Checkpoint;
}

/// Versioned serialized snapshot of a detector's parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub arch: String,
    pub class_count: usize,
    pub params: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write checkpoint: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)
            .with_context(|| format!("failed to read checkpoint: {}", path.display()))?;
        serde_json::from_slice(&content)
            .with_context(|| format!("failed to parse checkpoint: {}", path.display()))
    }
}

/// Instantiate the bundled detector with its default ("pretrained")
/// backbone weights and a classification head sized for `class_count`.
pub fn pretrained(class_count: usize) -> Box<dyn Detector> {
    Box::new(GridDetector::pretrained(class_count))
}

/// Load a detector from a checkpoint file, dispatching on its `arch` tag.
pub fn load_detector(path: &Path) -> Result<Box<dyn Detector>> {
    let checkpoint = Checkpoint::load(path)?;
    match checkpoint.arch.as_str() {
        grid::ARCH => Ok(Box::new(GridDetector::from_checkpoint(&checkpoint)?)),
        other => anyhow::bail!("unknown detector architecture '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_breakdown_total_and_accumulate() {
        let mut acc = LossBreakdown::default();
        acc.accumulate(&LossBreakdown {
            classifier: 0.5,
            box_reg: 0.25,
            rpn_box_reg: 0.125,
            objectness: 0.125,
        });
        acc.accumulate(&LossBreakdown {
            classifier: 0.5,
            box_reg: 0.25,
            rpn_box_reg: 0.125,
            objectness: 0.125,
        });

        assert!((acc.total() - 2.0).abs() < 1e-6);
        let mean = acc.scaled(0.5);
        assert!((mean.classifier - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_breakdown_detected() {
        let diverged = LossBreakdown {
            classifier: f32::NAN,
            ..Default::default()
        };
        assert!(!diverged.is_finite());

        let infinite = LossBreakdown {
            box_reg: f32::INFINITY,
            ..Default::default()
        };
        assert!(!infinite.is_finite());
    }

    #[test]
    fn test_sgd_moves_against_gradient() {
        let mut opt = SgdOptimizer::for_detector(2);
        let mut params = vec![1.0_f32, -1.0];
        let grads = vec![0.5_f32, -0.5];

        opt.step(&mut params, &grads);

        assert!(params[0] < 1.0);
        assert!(params[1] > -1.0);
    }

    #[test]
    fn test_sgd_momentum_accelerates() {
        let mut opt = SgdOptimizer::for_detector(1);
        let mut params = vec![0.0_f32];
        let grads = vec![1.0_f32];

        opt.step(&mut params, &grads);
        let first_step = -params[0];
        let before = params[0];
        opt.step(&mut params, &grads);
        let second_step = before - params[0];

        // with momentum the second step under a constant gradient is larger
        assert!(second_step > first_step);
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let detector = GridDetector::pretrained(2);
        detector.checkpoint().save(&path).unwrap();

        let loaded = load_detector(&path).unwrap();
        assert_eq!(loaded.class_count(), 2);
        assert_eq!(loaded.parameter_count(), detector.parameter_count());
    }

    #[test]
    fn test_unknown_arch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let checkpoint = Checkpoint {
            version: 1,
            arch: "transformer".to_string(),
            class_count: 2,
            params: vec![0.0; 8],
            created_at: Utc::now(),
        };
        checkpoint.save(&path).unwrap();

        assert!(load_detector(&path).is_err());
    }
}
