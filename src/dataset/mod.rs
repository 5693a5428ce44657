//! Dataset views over ingested COCO splits.
//!
//! A dataset view is index-addressed: `get(i)` loads the image, loads its
//! annotations, applies the transform pipeline to both jointly, and returns
//! a normalized image tensor plus a detection target. Images with zero
//! annotations are excluded up front.
//!
//! Views are persisted between stages as small JSON manifests (root, split,
//! transform pipeline, seed) rather than serialized objects; reopening a
//! manifest reconstructs the identical view.

pub mod transform;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::domain::annotation::CocoIndex;
use crate::domain::BoundingBox;

pub use transform::{TransformOp, TransformPipeline};

/// Detection target for one image, boxes in `(xmin, ymin, xmax, ymax)` form.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub boxes: Vec<[f32; 4]>,
    /// Remapped category labels, `1..=class_count`, parallel to `boxes`
    pub labels: Vec<usize>,
    pub image_id: i64,
    /// Areas computed from the transformed boxes, not the originals
    pub areas: Vec<f32>,
    pub is_crowd: Vec<bool>,
}

/// One dataset item: normalized `(3, H, W)` image tensor plus its target.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: Array3<f32>,
    pub target: Target,
}

/// Index-addressed dataset abstraction consumed by training and evaluation.
pub trait DatasetView: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<Sample>;
}

/// A COCO split bound to a transform pipeline.
pub struct CocoDataset {
    split_dir: PathBuf,
    pipeline: TransformPipeline,
    seed: u64,
    index: CocoIndex,
    ids: Vec<i64>,
    remap: BTreeMap<i64, usize>,
}

impl CocoDataset {
    /// Open the split at `split_dir`, filtering out unannotated images.
    pub fn open(split_dir: &Path, pipeline: TransformPipeline, seed: u64) -> Result<Self> {
        let index = CocoIndex::load(split_dir)?;
        let ids = index.annotated_image_ids();
        let remap = index.category_remap();

        Ok(Self {
            split_dir: split_dir.to_path_buf(),
            pipeline,
            seed,
            index,
            ids,
            remap,
        })
    }

    pub fn class_count(&self) -> usize {
        self.index.category_count()
    }

    pub fn split_dir(&self) -> &Path {
        &self.split_dir
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn load_image(&self, file_name: &str) -> Result<image::RgbImage> {
        let path = self.split_dir.join(file_name);
        let img = image::open(&path)
            .with_context(|| format!("failed to load image: {}", path.display()))?;
        Ok(img.to_rgb8())
    }

    // Deterministic per-item rng so augmentation is independently sampled
    // per image yet reproducible for a fixed dataset seed.
    fn item_rng(&self, index: usize) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl DatasetView for CocoDataset {
    fn len(&self) -> usize {
        self.ids.len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let id = *self
            .ids
            .get(index)
            .with_context(|| format!("dataset index {} out of range", index))?;
        let entry = self
            .index
            .image(id)
            .with_context(|| format!("annotation file lists no image with id {}", id))?;

        let image = self.load_image(&entry.file_name)?;
        let annotations = self.index.annotations_for(id);

        let mut boxes: Vec<BoundingBox> = annotations.iter().map(|a| a.bbox).collect();
        let labels: Vec<usize> = annotations
            .iter()
            .map(|a| {
                self.remap
                    .get(&a.category_id)
                    .copied()
                    .with_context(|| format!("unknown category id {}", a.category_id))
            })
            .collect::<Result<_>>()?;
        let is_crowd: Vec<bool> = annotations.iter().map(|a| a.is_crowd).collect();

        let mut rng = self.item_rng(index);
        let transformed = self.pipeline.apply(&mut rng, image, &mut boxes);

        let corner_boxes: Vec<[f32; 4]> = boxes.iter().map(|b| b.to_corners()).collect();
        let areas: Vec<f32> = corner_boxes
            .iter()
            .map(|[xmin, ymin, xmax, ymax]| (xmax - xmin) * (ymax - ymin))
            .collect();

        Ok(Sample {
            image: to_tensor(&transformed),
            target: Target {
                boxes: corner_boxes,
                labels,
                image_id: id,
                areas,
                is_crowd,
            },
        })
    }
}

/// Convert an RGB image to a normalized `(3, H, W)` float tensor.
pub fn to_tensor(image: &image::RgbImage) -> Array3<f32> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array3::<f32>::zeros((3, height, width));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Persisted description of a dataset view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub version: u32,
    pub split_dir: PathBuf,
    pub transform: TransformPipeline,
    pub seed: u64,
}

impl DatasetManifest {
    pub fn describe(dataset: &CocoDataset) -> Self {
        Self {
            version: 1,
            split_dir: dataset.split_dir().to_path_buf(),
            transform: dataset.pipeline().clone(),
            seed: dataset.seed(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write dataset manifest: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dataset manifest: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse dataset manifest: {}", path.display()))
    }

    /// Reconstruct the dataset view this manifest describes.
    pub fn open(path: &Path) -> Result<CocoDataset> {
        let manifest = Self::load(path)?;
        CocoDataset::open(&manifest.split_dir, manifest.transform, manifest.seed)
    }
}

/// A mini-batch: images and targets as parallel sequences. Box counts vary
/// per image, so items are never stacked into a single tensor.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Vec<Array3<f32>>,
    pub targets: Vec<Target>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Collate loaded samples into a batch, keeping parallel sequences.
pub fn collate(samples: Vec<Sample>) -> Batch {
    let mut images = Vec::with_capacity(samples.len());
    let mut targets = Vec::with_capacity(samples.len());
    for sample in samples {
        images.push(sample.image);
        targets.push(sample.target);
    }
    Batch { images, targets }
}

/// Sequential batch loader with worker-thread image decoding.
pub struct BatchLoader<'a, D: DatasetView + ?Sized> {
    dataset: &'a D,
    order: Vec<usize>,
    batch_size: usize,
    num_workers: usize,
}

impl<'a, D: DatasetView + ?Sized> BatchLoader<'a, D> {
    pub fn new(dataset: &'a D, batch_size: usize, num_workers: usize) -> Self {
        Self {
            dataset,
            order: (0..dataset.len()).collect(),
            batch_size: batch_size.max(1),
            num_workers: num_workers.max(1),
        }
    }

    /// Like [`BatchLoader::new`] but with a shuffled visit order.
    pub fn shuffled(dataset: &'a D, batch_size: usize, num_workers: usize, seed: u64) -> Self {
        let mut loader = Self::new(dataset, batch_size, num_workers);
        let mut rng = StdRng::seed_from_u64(seed);
        loader.order.shuffle(&mut rng);
        loader
    }

    pub fn batch_count(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    /// Iterate over collated batches.
    pub fn iter(&self) -> impl Iterator<Item = Result<Batch>> + '_ {
        self.order
            .chunks(self.batch_size)
            .map(|indices| Ok(collate(self.load_indices(indices)?)))
    }

    fn load_indices(&self, indices: &[usize]) -> Result<Vec<Sample>> {
        if self.num_workers <= 1 || indices.len() <= 1 {
            return indices.iter().map(|&i| self.dataset.get(i)).collect();
        }

        let chunk = indices.len().div_ceil(self.num_workers);
        let chunk_results: Vec<Result<Vec<Sample>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = indices
                .chunks(chunk)
                .map(|chunk_indices| {
                    scope.spawn(move || {
                        chunk_indices
                            .iter()
                            .map(|&i| self.dataset.get(i))
                            .collect::<Result<Vec<_>>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("decode worker panicked"))
                .collect()
        });

        let mut samples = Vec::with_capacity(indices.len());
        for result in chunk_results {
            samples.extend(result?);
        }
        Ok(samples)
    }
}
