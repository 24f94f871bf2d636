//! Pipeline error types.

use medex_core::ExtractorError;
use thiserror::Error;

use crate::metrics::PipelineMetrics;

/// Why the staged pipeline was abandoned. Always absorbed by the fallback.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// The global pipeline deadline elapsed.
    #[error("pipeline timed out")]
    PipelineTimeout,

    /// A per-chunk extraction call exceeded its deadline.
    #[error("chunk {index} timed out")]
    ChunkTimeout { index: usize },

    /// Real contract drift detected in safe mode.
    #[error("contract drift detected")]
    ContractDrift,

    /// A collaborator call failed.
    #[error("stage failed: {0}")]
    Extractor(#[from] ExtractorError),
}

impl StageError {
    /// Fallback reason string recorded in the metrics.
    pub fn fallback_reason(&self) -> String {
        match self {
            StageError::PipelineTimeout => "timeout_pipeline".to_string(),
            StageError::ChunkTimeout { .. } => "timeout_chunk".to_string(),
            StageError::ContractDrift => "contract_drift".to_string(),
            StageError::Extractor(e) => format!("error_{}", e.kind()),
        }
    }
}

/// Both the staged pipeline and the single-shot fallback failed.
#[derive(Error, Debug)]
#[error("fallback extraction failed after {reason}: {source}")]
pub struct PipelineFailure {
    /// Fallback reason of the abandoned staged attempt.
    pub reason: String,
    #[source]
    pub source: ExtractorError,
    /// Timings collected up to the failure.
    pub metrics: PipelineMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_reasons() {
        assert_eq!(StageError::PipelineTimeout.fallback_reason(), "timeout_pipeline");
        assert_eq!(
            StageError::ChunkTimeout { index: 1 }.fallback_reason(),
            "timeout_chunk"
        );
        assert_eq!(StageError::ContractDrift.fallback_reason(), "contract_drift");
        assert_eq!(
            StageError::from(ExtractorError::BackendUnavailable("x".into())).fallback_reason(),
            "error_BackendUnavailable"
        );
        assert_eq!(
            StageError::from(ExtractorError::ModelOutputInvalid("x".into())).fallback_reason(),
            "error_ModelOutputInvalid"
        );
    }

    #[test]
    fn test_pipeline_failure_display() {
        let failure = PipelineFailure {
            reason: "timeout_pipeline".into(),
            source: ExtractorError::RateLimited,
            metrics: PipelineMetrics::default(),
        };
        assert_eq!(
            failure.to_string(),
            "fallback extraction failed after timeout_pipeline: Backend rate limited"
        );
    }
}
