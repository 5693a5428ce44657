//! Run identity and terminal pipeline outcomes.

use chrono::Local;
use serde::{Deserialize, Serialize};

use super::artifact::{EvaluationArtifact, PromotionArtifact};

/// Identifier for one pipeline execution, captured at process start.
/// All artifacts of a run live under `artifacts/<run-id>/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Capture the current local time as the run identifier.
    pub fn now() -> Self {
        Self(Local::now().format("%m_%d_%Y_%H_%M_%S").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal outcome of a training pipeline run.
///
/// Rejection is a first-class outcome rather than an error thrown mid-chain;
/// callers pattern-match and decide how to surface it. The CLI and HTTP
/// layers both treat `Rejected` as a pipeline failure signal.
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// The trained model beat the deployed one and was promoted.
    Accepted {
        evaluation: EvaluationArtifact,
        promotion: PromotionArtifact,
    },

    /// The trained model was not better; promotion was never invoked.
    Rejected {
        reason: String,
        evaluation: EvaluationArtifact,
    },
}

impl PipelineOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PipelineOutcome::Accepted { .. })
    }

    pub fn evaluation(&self) -> &EvaluationArtifact {
        match self {
            PipelineOutcome::Accepted { evaluation, .. } => evaluation,
            PipelineOutcome::Rejected { evaluation, .. } => evaluation,
        }
    }
}
