//! Grid-pooled linear detector.
//!
//! Pools the input into a fixed `GRID x GRID` of per-channel means and runs
//! three linear heads over the pooled features: per-class presence logits, a
//! per-class box regressor in normalized center form, and a single
//! objectness logit. Small enough to train on CPU while keeping the loss
//! surface of the two-stage detectors it stands in for: per-head components
//! with analytic gradients, summed into one scalar.

use anyhow::Result;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::{Batch, Target};

use super::{Checkpoint, Detection, Detector, LossBreakdown, SgdOptimizer};

/// Architecture tag written into checkpoints.
pub const ARCH: &str = "grid-linear";

const GRID: usize = 4;
const CHANNELS: usize = 3;
/// Pooled features plus a bias input.
const FEATURES: usize = CHANNELS * GRID * GRID + 1;

const PROB_EPS: f32 = 1e-6;
const INIT_SEED: u64 = 0x6865_6C6D_6574;

pub struct GridDetector {
    class_count: usize,
    params: Vec<f32>,
}

impl GridDetector {
    /// Deterministic default weights, head sized for `class_count`.
    pub fn pretrained(class_count: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(INIT_SEED);
        let params = (0..Self::param_len(class_count))
            .map(|_| rng.gen_range(-0.05..=0.05))
            .collect();
        Self {
            class_count,
            params,
        }
    }

    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self> {
        let expected = Self::param_len(checkpoint.class_count);
        if checkpoint.params.len() != expected {
            anyhow::bail!(
                "checkpoint holds {} parameters, expected {} for {} classes",
                checkpoint.params.len(),
                expected,
                checkpoint.class_count
            );
        }
        Ok(Self {
            class_count: checkpoint.class_count,
            params: checkpoint.params.clone(),
        })
    }

    fn param_len(class_count: usize) -> usize {
        // presence head K*F, box head 4K*F, objectness head F
        FEATURES * (5 * class_count + 1)
    }

    fn cls_weights(&self, class: usize) -> &[f32] {
        let start = class * FEATURES;
        &self.params[start..start + FEATURES]
    }

    fn box_weights(&self, class: usize, coord: usize) -> &[f32] {
        let start = (self.class_count + class * 4 + coord) * FEATURES;
        &self.params[start..start + FEATURES]
    }

    fn obj_weights(&self) -> &[f32] {
        let start = 5 * self.class_count * FEATURES;
        &self.params[start..start + FEATURES]
    }

    fn cls_offset(&self, class: usize) -> usize {
        class * FEATURES
    }

    fn box_offset(&self, class: usize, coord: usize) -> usize {
        (self.class_count + class * 4 + coord) * FEATURES
    }

    fn obj_offset(&self) -> usize {
        5 * self.class_count * FEATURES
    }

    /// Mean-pool each channel over a `GRID x GRID` partition, bias last.
    fn features(image: &Array3<f32>) -> Vec<f32> {
        let (channels, height, width) = image.dim();
        debug_assert_eq!(channels, CHANNELS);

        let mut sums = vec![0.0_f32; CHANNELS * GRID * GRID];
        let mut counts = vec![0.0_f32; GRID * GRID];
        for y in 0..height {
            let gy = (y * GRID / height).min(GRID - 1);
            for x in 0..width {
                let gx = (x * GRID / width).min(GRID - 1);
                let cell = gy * GRID + gx;
                counts[cell] += 1.0;
                for c in 0..CHANNELS {
                    sums[c * GRID * GRID + cell] += image[[c, y, x]];
                }
            }
        }

        let mut features = Vec::with_capacity(FEATURES);
        for c in 0..CHANNELS {
            for cell in 0..GRID * GRID {
                let count = counts[cell].max(1.0);
                features.push(sums[c * GRID * GRID + cell] / count);
            }
        }
        features.push(1.0);
        features
    }

    /// Loss for one image; when `grads` is given, accumulate parameter
    /// gradients scaled by `grad_scale` (the batch-mean factor).
    fn image_loss(
        &self,
        image: &Array3<f32>,
        target: &Target,
        mut grads: Option<(&mut [f32], f32)>,
    ) -> LossBreakdown {
        let features = Self::features(image);
        let k = self.class_count;

        let mut present = vec![false; k];
        let mut class_box: Vec<Option<[f32; 4]>> = vec![None; k];
        let (_, height, width) = image.dim();
        for (bbox, &label) in target.boxes.iter().zip(&target.labels) {
            if label == 0 || label > k {
                continue;
            }
            present[label - 1] = true;
            if class_box[label - 1].is_none() {
                // normalized center form (cx, cy, w, h)
                let [xmin, ymin, xmax, ymax] = *bbox;
                class_box[label - 1] = Some([
                    (xmin + xmax) / 2.0 / width as f32,
                    (ymin + ymax) / 2.0 / height as f32,
                    (xmax - xmin) / width as f32,
                    (ymax - ymin) / height as f32,
                ]);
            }
        }

        let mut loss = LossBreakdown::default();

        // presence head, binary cross-entropy averaged over classes
        for class in 0..k {
            let logit = dot(self.cls_weights(class), &features);
            let prob = sigmoid(logit).clamp(PROB_EPS, 1.0 - PROB_EPS);
            let label = if present[class] { 1.0 } else { 0.0 };
            loss.classifier += bce(prob, label) / k as f32;
            if let Some((grad_buf, scale)) = grads.as_mut() {
                let dz = (prob - label) / k as f32 * *scale;
                axpy(&mut grad_buf[self.cls_offset(class)..], dz, &features);
            }
        }

        // objectness head, one logit per image
        let obj_label = if target.boxes.is_empty() { 0.0 } else { 1.0 };
        let obj_logit = dot(self.obj_weights(), &features);
        let obj_prob = sigmoid(obj_logit).clamp(PROB_EPS, 1.0 - PROB_EPS);
        loss.objectness += bce(obj_prob, obj_label);
        if let Some((grad_buf, scale)) = grads.as_mut() {
            let dz = (obj_prob - obj_label) * *scale;
            axpy(&mut grad_buf[self.obj_offset()..], dz, &features);
        }

        // box head, squared error against one representative box per
        // present class: centers feed rpn_box_reg, sizes feed box_reg
        let present_count = class_box.iter().flatten().count().max(1) as f32;
        for class in 0..k {
            let Some(target_box) = class_box[class] else {
                continue;
            };
            for coord in 0..4 {
                let raw = dot(self.box_weights(class, coord), &features);
                let pred = sigmoid(raw);
                let diff = pred - target_box[coord];
                let component = diff * diff / 2.0 / present_count;
                if coord < 2 {
                    loss.rpn_box_reg += component;
                } else {
                    loss.box_reg += component;
                }
                if let Some((grad_buf, scale)) = grads.as_mut() {
                    let dz = diff * pred * (1.0 - pred) / present_count * *scale;
                    axpy(&mut grad_buf[self.box_offset(class, coord)..], dz, &features);
                }
            }
        }

        loss
    }

    fn batch_loss(&self, batch: &Batch, mut grads: Option<&mut [f32]>) -> Result<LossBreakdown> {
        if batch.is_empty() {
            anyhow::bail!("cannot score an empty batch");
        }

        let scale = 1.0 / batch.len() as f32;
        let mut total = LossBreakdown::default();
        for (image, target) in batch.images.iter().zip(&batch.targets) {
            let image_grads = grads.as_deref_mut().map(|g| (g, scale));
            total.accumulate(&self.image_loss(image, target, image_grads));
        }
        Ok(total.scaled(scale))
    }
}

impl Detector for GridDetector {
    fn class_count(&self) -> usize {
        self.class_count
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }

    fn forward_loss(&self, batch: &Batch) -> Result<LossBreakdown> {
        self.batch_loss(batch, None)
    }

    fn train_step(
        &mut self,
        batch: &Batch,
        optimizer: &mut SgdOptimizer,
    ) -> Result<LossBreakdown> {
        let mut grads = vec![0.0_f32; self.params.len()];
        let loss = self.batch_loss(batch, Some(&mut grads))?;
        optimizer.step(&mut self.params, &grads);
        Ok(loss)
    }

    fn predict(&self, image: &Array3<f32>) -> Result<Vec<Detection>> {
        let features = Self::features(image);
        let (_, height, width) = image.dim();
        let (width, height) = (width as f32, height as f32);

        let obj_prob = sigmoid(dot(self.obj_weights(), &features));

        let mut detections = Vec::with_capacity(self.class_count);
        for class in 0..self.class_count {
            let score = sigmoid(dot(self.cls_weights(class), &features)) * obj_prob;

            let coord =
                |i: usize| sigmoid(dot(self.box_weights(class, i), &features));
            let (cx, cy) = (coord(0) * width, coord(1) * height);
            let (w, h) = (coord(2) * width, coord(3) * height);

            detections.push(Detection {
                bbox: [
                    (cx - w / 2.0).clamp(0.0, width),
                    (cy - h / 2.0).clamp(0.0, height),
                    (cx + w / 2.0).clamp(0.0, width),
                    (cy + h / 2.0).clamp(0.0, height),
                ],
                label: class + 1,
                score,
            });
        }
        Ok(detections)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            version: 1,
            arch: ARCH.to_string(),
            class_count: self.class_count,
            params: self.params.clone(),
            created_at: chrono::Utc::now(),
        }
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

fn bce(prob: f32, label: f32) -> f32 {
    -(label * prob.ln() + (1.0 - label) * (1.0 - prob).ln())
}

fn dot(weights: &[f32], features: &[f32]) -> f32 {
    weights.iter().zip(features).map(|(w, f)| w * f).sum()
}

fn axpy(dest: &mut [f32], factor: f32, features: &[f32]) {
    for (d, f) in dest.iter_mut().zip(features) {
        *d += factor * f;
    }
}
