//! Prediction pipeline: deployed model inference over a single image.
//!
//! Every request re-downloads the deployed checkpoint to a fixed cache path,
//! so a promotion is visible on the very next prediction without restarting
//! the service.

use std::sync::Arc;

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::{debug, info};

use crate::config::{PipelineConfig, DEPLOYED_MODEL_KEY};
use crate::dataset::to_tensor;
use crate::detector::{self, Detection};
use crate::error::{Stage, StageError, StageResultExt};
use crate::storage::StorageGateway;

/// Border width of rendered detection boxes, in pixels.
const BOX_WIDTH: u32 = 4;

/// Human-readable class names, indexed by detector label (labels start at 1).
/// Labels past the end fall back to a numbered name.
pub const PREDICTION_CLASSES: &[&str] = &["helmet", "head"];

/// Name for a detector label.
pub fn class_name(label: usize) -> String {
    label
        .checked_sub(1)
        .and_then(|i| PREDICTION_CLASSES.get(i))
        .map(|name| (*name).to_string())
        .unwrap_or_else(|| format!("class-{label}"))
}

/// Inference result: the annotated JPEG plus the detections drawn onto it.
/// Box coordinates are in the input image's pixel space.
#[derive(Debug)]
pub struct Prediction {
    pub jpeg: Vec<u8>,
    pub detections: Vec<Detection>,
}

/// Stable per-class colors, cycled when there are more classes.
const PALETTE: [[u8; 3]; 6] = [
    [220, 20, 60],
    [0, 130, 200],
    [60, 180, 75],
    [255, 165, 0],
    [145, 30, 180],
    [0, 128, 128],
];

pub struct PredictionPipeline {
    config: Arc<PipelineConfig>,
    gateway: Arc<dyn StorageGateway>,
}

impl PredictionPipeline {
    pub fn new(config: Arc<PipelineConfig>, gateway: Arc<dyn StorageGateway>) -> Self {
        Self { config, gateway }
    }

    /// Run inference on encoded image bytes and return the annotated JPEG
    /// together with the detections drawn onto it.
    pub async fn run(&self, image_bytes: &[u8]) -> Result<Prediction, StageError> {
        self.infer(image_bytes).await.in_stage(Stage::Prediction)
    }

    async fn infer(&self, image_bytes: &[u8]) -> Result<Prediction> {
        let model_path = self
            .gateway
            .download(
                DEPLOYED_MODEL_KEY,
                &self.config.bucket,
                &self.config.predict_model_path(),
            )
            .await?;
        let detector = detector::load_detector(&model_path)?;

        // the decoded image stays the canvas; only the detector sees the
        // resized copy, and boxes are mapped back to input coordinates
        let mut canvas = image::load_from_memory(image_bytes)
            .context("request body is not a decodable image")?
            .to_rgb8();
        let size = self.config.input_size;
        let resized =
            image::imageops::resize(&canvas, size, size, image::imageops::FilterType::Triangle);

        let detections = detector.predict(&to_tensor(&resized))?;
        let (sx, sy) = (
            canvas.width() as f32 / size as f32,
            canvas.height() as f32 / size as f32,
        );
        let kept: Vec<Detection> = detections
            .iter()
            .filter(|d| d.score > self.config.score_threshold)
            .map(|d| Detection {
                bbox: [
                    d.bbox[0] * sx,
                    d.bbox[1] * sy,
                    d.bbox[2] * sx,
                    d.bbox[3] * sy,
                ],
                label: d.label,
                score: d.score,
            })
            .collect();
        info!(
            detections = detections.len(),
            rendered = kept.len(),
            "prediction complete"
        );

        for detection in &kept {
            debug!(
                class = %class_name(detection.label),
                score = detection.score,
                "rendering detection"
            );
            draw_detection(&mut canvas, detection);
        }

        let mut jpeg = Vec::new();
        image::DynamicImage::ImageRgb8(canvas)
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .context("failed to encode annotated image")?;
        Ok(Prediction {
            jpeg,
            detections: kept,
        })
    }
}

fn draw_detection(canvas: &mut RgbImage, detection: &Detection) {
    let color = Rgb(PALETTE[(detection.label.saturating_sub(1)) % PALETTE.len()]);
    let [xmin, ymin, xmax, ymax] = detection.bbox;
    let (x, y) = (xmin.round() as i32, ymin.round() as i32);
    let (w, h) = (
        ((xmax - xmin).round() as u32).max(1),
        ((ymax - ymin).round() as u32).max(1),
    );

    // hollow rects nested inward to get a thick border
    for inset in 0..BOX_WIDTH as i32 {
        let (iw, ih) = (w as i32 - 2 * inset, h as i32 - 2 * inset);
        if iw < 1 || ih < 1 {
            break;
        }
        draw_hollow_rect_mut(
            canvas,
            Rect::at(x + inset, y + inset).of_size(iw as u32, ih as u32),
            color,
        );
    }
}
