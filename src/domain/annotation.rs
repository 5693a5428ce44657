//! COCO-format annotation parsing.
//!
//! The dataset archive carries one `_annotations.coco.json` per split. This
//! module indexes it for per-image lookups and defines the bounding-box
//! coordinate conversions shared by transformation, training and inference.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// File name of the annotation document inside each split directory.
pub const ANNOTATION_FILE_NAME: &str = "_annotations.coco.json";

/// An axis-aligned box in COCO `(x, y, width, height)` convention, where
/// `(x, y)` is the top-left corner in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert to `(xmin, ymin, xmax, ymax)` corner form.
    pub fn to_corners(self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    /// Rebuild from `(xmin, ymin, xmax, ymax)` corner form.
    pub fn from_corners(corners: [f32; 4]) -> Self {
        Self {
            x: corners[0],
            y: corners[1],
            width: corners[2] - corners[0],
            height: corners[3] - corners[1],
        }
    }

    /// Area in square pixels.
    pub fn area(self) -> f32 {
        self.width * self.height
    }
}

/// One labeled box attached to an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub image_id: i64,
    pub category_id: i64,
    pub bbox: BoundingBox,
    pub is_crowd: bool,
}

/// Image metadata as listed in the annotation document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageEntry {
    pub id: i64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct RawAnnotation {
    image_id: i64,
    category_id: i64,
    bbox: [f32; 4],
    #[serde(default)]
    iscrowd: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCategory {
    id: i64,
    #[allow(dead_code)]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCocoFile {
    images: Vec<ImageEntry>,
    annotations: Vec<RawAnnotation>,
    categories: Vec<RawCategory>,
}

/// Indexed view over one split's annotation document.
#[derive(Debug, Clone)]
pub struct CocoIndex {
    images: BTreeMap<i64, ImageEntry>,
    annotations: BTreeMap<i64, Vec<AnnotationRecord>>,
    category_ids: Vec<i64>,
}

impl CocoIndex {
    /// Parse the annotation file found in `split_dir`.
    pub fn load(split_dir: &Path) -> Result<Self> {
        let path = split_dir.join(ANNOTATION_FILE_NAME);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read annotation file: {}", path.display()))?;
        let raw: RawCocoFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse annotation file: {}", path.display()))?;

        let images: BTreeMap<i64, ImageEntry> =
            raw.images.into_iter().map(|img| (img.id, img)).collect();

        let mut annotations: BTreeMap<i64, Vec<AnnotationRecord>> = BTreeMap::new();
        for ann in raw.annotations {
            annotations
                .entry(ann.image_id)
                .or_default()
                .push(AnnotationRecord {
                    image_id: ann.image_id,
                    category_id: ann.category_id,
                    bbox: BoundingBox::new(ann.bbox[0], ann.bbox[1], ann.bbox[2], ann.bbox[3]),
                    is_crowd: ann.iscrowd != 0,
                });
        }

        let mut category_ids: Vec<i64> = raw.categories.iter().map(|c| c.id).collect();
        category_ids.sort_unstable();
        category_ids.dedup();

        Ok(Self {
            images,
            annotations,
            category_ids,
        })
    }

    /// Number of distinct annotation categories.
    pub fn category_count(&self) -> usize {
        self.category_ids.len()
    }

    /// Map raw category ids onto contiguous labels `1..=N`, sorted by id.
    /// The detector's classification head is sized from this mapping.
    pub fn category_remap(&self) -> BTreeMap<i64, usize> {
        self.category_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i + 1))
            .collect()
    }

    /// Image ids that carry at least one annotation, in ascending order.
    /// Images with zero annotations are unusable for training and excluded.
    pub fn annotated_image_ids(&self) -> Vec<i64> {
        self.images
            .keys()
            .filter(|id| {
                self.annotations
                    .get(id)
                    .map(|a| !a.is_empty())
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    pub fn image(&self, id: i64) -> Option<&ImageEntry> {
        self.images.get(&id)
    }

    pub fn annotations_for(&self, id: i64) -> &[AnnotationRecord] {
        self.annotations.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_corner_round_trip() {
        let bbox = BoundingBox::new(12.5, 7.25, 31.0, 19.5);
        let restored = BoundingBox::from_corners(bbox.to_corners());

        assert!((restored.x - bbox.x).abs() < 1e-5);
        assert!((restored.y - bbox.y).abs() < 1e-5);
        assert!((restored.width - bbox.width).abs() < 1e-5);
        assert!((restored.height - bbox.height).abs() < 1e-5);
    }

    #[test]
    fn test_box_area_from_corners() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 4.0);
        let [xmin, ymin, xmax, ymax] = bbox.to_corners();
        assert_eq!((xmax - xmin) * (ymax - ymin), bbox.area());
    }

    fn sample_index() -> CocoIndex {
        let dir = tempfile::tempdir().unwrap();
        let doc = serde_json::json!({
            "images": [
                {"id": 1, "file_name": "a.jpg", "width": 416, "height": 416},
                {"id": 2, "file_name": "b.jpg", "width": 416, "height": 416},
                {"id": 3, "file_name": "c.jpg", "width": 416, "height": 416}
            ],
            "annotations": [
                {"id": 10, "image_id": 1, "category_id": 1, "bbox": [1.0, 2.0, 3.0, 4.0], "iscrowd": 0},
                {"id": 11, "image_id": 1, "category_id": 2, "bbox": [5.0, 6.0, 7.0, 8.0], "iscrowd": 0},
                {"id": 12, "image_id": 3, "category_id": 2, "bbox": [0.0, 0.0, 9.0, 9.0], "iscrowd": 1}
            ],
            "categories": [
                {"id": 1, "name": "helmet"},
                {"id": 2, "name": "head"}
            ]
        });
        std::fs::write(
            dir.path().join(ANNOTATION_FILE_NAME),
            serde_json::to_vec(&doc).unwrap(),
        )
        .unwrap();
        let index = CocoIndex::load(dir.path()).unwrap();
        // tempdir dropped; index already owns the parsed content
        index
    }

    #[test]
    fn test_category_count_counts_distinct_ids() {
        let index = sample_index();
        assert_eq!(index.category_count(), 2);
    }

    #[test]
    fn test_remap_is_one_based_and_contiguous() {
        let index = sample_index();
        let remap = index.category_remap();
        assert_eq!(remap.get(&1), Some(&1));
        assert_eq!(remap.get(&2), Some(&2));
    }

    #[test]
    fn test_unannotated_images_excluded() {
        let index = sample_index();
        assert_eq!(index.annotated_image_ids(), vec![1, 3]);
    }

    #[test]
    fn test_annotations_for_missing_image_is_empty() {
        let index = sample_index();
        assert!(index.annotations_for(2).is_empty());
        assert!(index.annotations_for(99).is_empty());
    }
}
