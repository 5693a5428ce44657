//! hardhat - helmet-detection training and serving pipeline
//!
//! An end-to-end pipeline for a safety-helmet object detector: ingest a
//! labeled dataset archive from object storage, build augmented dataset
//! views, train a detector, evaluate it against the currently deployed
//! checkpoint, promote it only when it is strictly better, and serve
//! predictions over HTTP.
//!
//! # Architecture
//!
//! The training pipeline is a strict linear chain; each stage writes its
//! artifacts under a timestamped run directory and hands a small immutable
//! artifact value to the next stage:
//!
//! ingestion -> transformation -> training -> evaluation -> (promotion)
//!
//! Rejection by the evaluation gate is a first-class outcome, not an error.
//!
//! # Modules
//!
//! - `domain`: value objects (artifacts, COCO annotations, run outcomes)
//! - `storage`: object-store gateway (S3-compatible HTTP, local directory)
//! - `dataset`: dataset views, transform pipelines, batching
//! - `detector`: detector capability trait, optimizer, checkpoints
//! - `stages`: the five pipeline stages
//! - `pipeline`: the training and prediction pipelines
//! - `serve`: HTTP endpoints
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the training pipeline once
//! hardhat train
//!
//! # Serve GET /train and POST /predict
//! hardhat serve
//!
//! # Annotate a local image with the deployed model
//! hardhat predict site-photo.jpg -o annotated.jpg
//! ```

pub mod cli;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod domain;
pub mod error;
pub mod pipeline;
pub mod serve;
pub mod stages;
pub mod storage;

// Re-export main types at crate root for convenience
pub use config::{PipelineConfig, RunPaths};
pub use domain::{
    EvaluationArtifact, IngestionArtifact, PipelineOutcome, PromotionArtifact, RunId,
    TrainingArtifact, TransformationArtifact,
};
pub use error::{Stage, StageError};
pub use pipeline::{PredictionPipeline, TrainPipeline};
pub use storage::{connect, StorageGateway};
