//! Artifacts produced by pipeline stages.
//!
//! Each stage produces exactly one artifact, consumed by the next stage in
//! the chain. Artifacts hold only paths and scalar decisions, never loaded
//! datasets or model weights, and are never mutated after creation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Output of the data ingestion stage: the extracted dataset splits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionArtifact {
    /// Directory with training images and their annotation file
    pub train_path: PathBuf,

    /// Directory with held-out test images and their annotation file
    pub test_path: PathBuf,

    /// Directory with validation images and their annotation file
    pub valid_path: PathBuf,
}

/// Output of the data transformation stage: persisted dataset views.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationArtifact {
    /// Serialized training dataset view (with augmentation pipeline)
    pub train_object_path: PathBuf,

    /// Serialized test dataset view (resize only)
    pub test_object_path: PathBuf,

    /// Number of distinct annotation categories; sizes the detector head
    pub class_count: usize,
}

/// Output of the training stage: the persisted checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArtifact {
    /// Path to the trained model checkpoint
    pub model_path: PathBuf,
}

/// Output of the evaluation stage: the promotion gate decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationArtifact {
    /// Whether the freshly trained model beat the deployed one
    pub is_accepted: bool,

    /// Mean loss of the winning model (trained if accepted, deployed if not)
    pub metric_value: f32,
}

/// Output of the promotion stage: where the model now lives remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionArtifact {
    /// Bucket holding the deployed model
    pub bucket_name: String,

    /// Remote key of the deployed model
    pub remote_model_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_serialization_round_trip() {
        let artifact = TransformationArtifact {
            train_object_path: PathBuf::from("artifacts/run/Train/train.json"),
            test_object_path: PathBuf::from("artifacts/run/Test/test.json"),
            class_count: 3,
        };

        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: TransformationArtifact = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.class_count, 3);
        assert_eq!(parsed.train_object_path, artifact.train_object_path);
    }

    #[test]
    fn test_evaluation_artifact_carries_decision() {
        let artifact = EvaluationArtifact {
            is_accepted: false,
            metric_value: 0.03,
        };

        let json = serde_json::to_string(&artifact).unwrap();
        let parsed: EvaluationArtifact = serde_json::from_str(&json).unwrap();

        assert!(!parsed.is_accepted);
        assert!((parsed.metric_value - 0.03).abs() < f32::EPSILON);
    }
}
