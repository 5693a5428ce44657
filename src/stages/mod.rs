//! Pipeline stages.
//!
//! Each stage is a small struct holding its injected dependencies (config,
//! storage gateway, run paths). `run` consumes the previous stage's artifact
//! by reference and returns its own; every failure surfaces as a
//! [`StageError`](crate::error::StageError) naming the stage.

pub mod evaluation;
pub mod ingestion;
pub mod promotion;
pub mod training;
pub mod transformation;

pub use evaluation::EvaluationStage;
pub use ingestion::IngestionStage;
pub use promotion::PromotionStage;
pub use training::TrainingStage;
pub use transformation::TransformationStage;
