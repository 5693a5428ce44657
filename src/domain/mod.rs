//! Domain types for the hardhat pipeline.
//!
//! This module contains the core data structures:
//! - Artifacts: immutable stage outputs (paths and scalar decisions)
//! - Annotations: COCO-format labels and bounding boxes
//! - Run: run identity and terminal pipeline outcomes

pub mod annotation;
pub mod artifact;
pub mod run;

// Re-export commonly used types
pub use annotation::{AnnotationRecord, BoundingBox, CocoIndex};
pub use artifact::{
    EvaluationArtifact, IngestionArtifact, PromotionArtifact, TrainingArtifact,
    TransformationArtifact,
};
pub use run::{PipelineOutcome, RunId};
