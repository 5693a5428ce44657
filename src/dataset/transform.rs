//! Serializable image transform pipelines.
//!
//! A pipeline is an ordered list of named operations with parameters,
//! applied jointly to the image and its boxes so geometric transforms keep
//! boxes aligned with the pixels. Each probabilistic op is sampled
//! independently per image.

use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::AugmentConfig;
use crate::domain::BoundingBox;

/// One transform operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOp {
    Resize { width: u32, height: u32 },
    HorizontalFlip { probability: f32 },
    VerticalFlip { probability: f32 },
    /// Additive brightness and multiplicative contrast jitter
    BrightnessContrast { probability: f32, max_delta: f32 },
    /// Independent per-channel gain jitter
    ColorJitter { probability: f32, max_delta: f32 },
}

/// An ordered transform pipeline. Boxes stay in the COCO `(x, y, w, h)`
/// convention throughout; geometric ops rewrite them alongside the pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformPipeline {
    pub ops: Vec<TransformOp>,
}

impl TransformPipeline {
    /// Augmenting pipeline used for the training split.
    pub fn training(input_size: u32, augment: &AugmentConfig) -> Self {
        Self {
            ops: vec![
                TransformOp::Resize {
                    width: input_size,
                    height: input_size,
                },
                TransformOp::HorizontalFlip {
                    probability: augment.horizontal_flip,
                },
                TransformOp::VerticalFlip {
                    probability: augment.vertical_flip,
                },
                TransformOp::BrightnessContrast {
                    probability: augment.brightness_contrast,
                    max_delta: 0.2,
                },
                TransformOp::ColorJitter {
                    probability: augment.color_jitter,
                    max_delta: 0.2,
                },
            ],
        }
    }

    /// Resize-only pipeline used for evaluation.
    pub fn evaluation(input_size: u32) -> Self {
        Self {
            ops: vec![TransformOp::Resize {
                width: input_size,
                height: input_size,
            }],
        }
    }

    /// Apply every op in order, rewriting `boxes` in lockstep with the image.
    pub fn apply(
        &self,
        rng: &mut StdRng,
        mut image: RgbImage,
        boxes: &mut [BoundingBox],
    ) -> RgbImage {
        for op in &self.ops {
            image = apply_op(op, rng, image, boxes);
        }
        image
    }
}

fn apply_op(
    op: &TransformOp,
    rng: &mut StdRng,
    image: RgbImage,
    boxes: &mut [BoundingBox],
) -> RgbImage {
    match *op {
        TransformOp::Resize { width, height } => {
            let (old_w, old_h) = (image.width() as f32, image.height() as f32);
            let resized = imageops::resize(&image, width, height, FilterType::Triangle);
            let sx = width as f32 / old_w;
            let sy = height as f32 / old_h;
            for b in boxes.iter_mut() {
                b.x *= sx;
                b.width *= sx;
                b.y *= sy;
                b.height *= sy;
            }
            resized
        }
        TransformOp::HorizontalFlip { probability } => {
            if rng.gen::<f32>() >= probability {
                return image;
            }
            let w = image.width() as f32;
            for b in boxes.iter_mut() {
                b.x = w - b.x - b.width;
            }
            imageops::flip_horizontal(&image)
        }
        TransformOp::VerticalFlip { probability } => {
            if rng.gen::<f32>() >= probability {
                return image;
            }
            let h = image.height() as f32;
            for b in boxes.iter_mut() {
                b.y = h - b.y - b.height;
            }
            imageops::flip_vertical(&image)
        }
        TransformOp::BrightnessContrast {
            probability,
            max_delta,
        } => {
            if rng.gen::<f32>() >= probability {
                return image;
            }
            let brightness = (rng.gen_range(-max_delta..=max_delta) * 255.0) as i32;
            let contrast = rng.gen_range(-max_delta..=max_delta) * 100.0;
            imageops::colorops::contrast(&imageops::colorops::brighten(&image, brightness), contrast)
        }
        TransformOp::ColorJitter {
            probability,
            max_delta,
        } => {
            if rng.gen::<f32>() >= probability {
                return image;
            }
            let gains = [
                1.0 + rng.gen_range(-max_delta..=max_delta),
                1.0 + rng.gen_range(-max_delta..=max_delta),
                1.0 + rng.gen_range(-max_delta..=max_delta),
            ];
            let mut jittered = image;
            for pixel in jittered.pixels_mut() {
                for (channel, gain) in pixel.0.iter_mut().zip(gains) {
                    *channel = (*channel as f32 * gain).clamp(0.0, 255.0) as u8;
                }
            }
            jittered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn checker(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgb([200, 50, 10])
            } else {
                image::Rgb([10, 50, 200])
            }
        })
    }

    #[test]
    fn test_resize_scales_boxes() {
        let pipeline = TransformPipeline::evaluation(100);
        let mut rng = StdRng::seed_from_u64(0);
        let mut boxes = vec![BoundingBox::new(10.0, 20.0, 30.0, 10.0)];

        let out = pipeline.apply(&mut rng, checker(200, 50), &mut boxes);

        assert_eq!((out.width(), out.height()), (100, 100));
        // x scaled by 100/200, y scaled by 100/50
        assert!((boxes[0].x - 5.0).abs() < 1e-4);
        assert!((boxes[0].width - 15.0).abs() < 1e-4);
        assert!((boxes[0].y - 40.0).abs() < 1e-4);
        assert!((boxes[0].height - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_horizontal_flip_mirrors_boxes() {
        let pipeline = TransformPipeline {
            ops: vec![TransformOp::HorizontalFlip { probability: 1.0 }],
        };
        let mut rng = StdRng::seed_from_u64(0);
        let mut boxes = vec![BoundingBox::new(10.0, 5.0, 20.0, 8.0)];

        let image = checker(100, 40);
        let flipped_pixel = *image.get_pixel(0, 0);
        let out = pipeline.apply(&mut rng, image, &mut boxes);

        // box mirrored: x' = W - x - w
        assert!((boxes[0].x - 70.0).abs() < 1e-4);
        assert_eq!(*out.get_pixel(99, 0), flipped_pixel);
    }

    #[test]
    fn test_vertical_flip_mirrors_boxes() {
        let pipeline = TransformPipeline {
            ops: vec![TransformOp::VerticalFlip { probability: 1.0 }],
        };
        let mut rng = StdRng::seed_from_u64(0);
        let mut boxes = vec![BoundingBox::new(10.0, 5.0, 20.0, 8.0)];

        pipeline.apply(&mut rng, checker(100, 40), &mut boxes);

        assert!((boxes[0].y - 27.0).abs() < 1e-4);
    }

    #[test]
    fn test_zero_probability_ops_are_identity() {
        let pipeline = TransformPipeline {
            ops: vec![
                TransformOp::HorizontalFlip { probability: 0.0 },
                TransformOp::VerticalFlip { probability: 0.0 },
                TransformOp::BrightnessContrast {
                    probability: 0.0,
                    max_delta: 0.2,
                },
                TransformOp::ColorJitter {
                    probability: 0.0,
                    max_delta: 0.2,
                },
            ],
        };
        let mut rng = StdRng::seed_from_u64(3);
        let mut boxes = vec![BoundingBox::new(1.0, 2.0, 3.0, 4.0)];

        let image = checker(16, 16);
        let out = pipeline.apply(&mut rng, image.clone(), &mut boxes);

        assert_eq!(out.as_raw(), image.as_raw());
        assert_eq!(boxes[0], BoundingBox::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_photometric_ops_leave_boxes_alone() {
        let pipeline = TransformPipeline {
            ops: vec![
                TransformOp::BrightnessContrast {
                    probability: 1.0,
                    max_delta: 0.2,
                },
                TransformOp::ColorJitter {
                    probability: 1.0,
                    max_delta: 0.2,
                },
            ],
        };
        let mut rng = StdRng::seed_from_u64(9);
        let mut boxes = vec![BoundingBox::new(1.0, 2.0, 3.0, 4.0)];

        pipeline.apply(&mut rng, checker(16, 16), &mut boxes);

        assert_eq!(boxes[0], BoundingBox::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_pipeline_serialization_round_trip() {
        let pipeline = TransformPipeline::training(416, &AugmentConfig::default());

        let json = serde_json::to_string(&pipeline).unwrap();
        let parsed: TransformPipeline = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, pipeline);
        assert_eq!(parsed.ops.len(), 5);
    }
}
