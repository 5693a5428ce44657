//! Uniform error wrapping for pipeline stages.
//!
//! Every stage wraps whatever failed underneath into a [`StageError`] naming
//! the stage, so callers always see which part of the chain broke and why.

use std::fmt;

use thiserror::Error;

/// The pipeline stage in which an error originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingestion,
    Transformation,
    Training,
    Evaluation,
    Promotion,
    Prediction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Ingestion => "data ingestion",
            Stage::Transformation => "data transformation",
            Stage::Training => "model training",
            Stage::Evaluation => "model evaluation",
            Stage::Promotion => "model promotion",
            Stage::Prediction => "prediction",
        };
        f.write_str(name)
    }
}

/// A non-finite loss during training or evaluation. Never recoverable: the
/// stage boundary terminates the process rather than wrapping it, since an
/// optimizer step over divergent gradients poisons every parameter.
#[derive(Debug, Error)]
#[error("loss became non-finite ({loss}) at batch {batch}")]
pub struct DivergenceError {
    pub batch: usize,
    pub loss: f32,
}

/// A failure inside a pipeline stage, carrying the original cause.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: anyhow::Error,
}

impl StageError {
    pub fn new(stage: Stage, source: impl Into<anyhow::Error>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Extension for converting underlying results into stage-scoped results.
pub trait StageResultExt<T> {
    fn in_stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T, E> StageResultExt<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn in_stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|e| StageError::new(stage, e))
    }
}
