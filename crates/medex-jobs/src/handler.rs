//! Job handlers: the staged pipeline and the degraded-mode stub.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::warn;
use uuid::Uuid;

use medex_core::defaults::DEGRADED_MODEL_VERSION;
use medex_core::{Diagnosis, DiagnosisCertainty, ExtractRequest, Job, StructuredFields};
use medex_pipeline::PipelineOrchestrator;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed, already marked running.
    pub job: Job,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn request(&self) -> &ExtractRequest {
        &self.job.request
    }
}

/// Payload of a successfully finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub result: JsonValue,
    pub fallback_used: bool,
    pub contract_warnings: Vec<String>,
    /// Inference time recorded for latency metrics and ETA.
    pub inference_ms: u64,
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Success(JobOutput),
    /// Job failed with a PHI-free error message.
    Failed(String),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// Runs the staged extraction pipeline.
pub struct PipelineHandler {
    orchestrator: Arc<PipelineOrchestrator>,
}

impl PipelineHandler {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    fn name(&self) -> &'static str {
        "pipeline"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        match self.orchestrator.run(ctx.request()).await {
            Ok(output) => {
                let metrics = output.metrics;
                JobResult::Success(JobOutput {
                    result: json!({
                        "fields": output.fields,
                        "modelVersion": metrics.model_version,
                        "pipeline": metrics.to_wire(),
                    }),
                    fallback_used: metrics.fallback_used(),
                    contract_warnings: metrics.contract_warnings.clone(),
                    inference_ms: metrics.total_ms,
                })
            }
            Err(failure) => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline_handler",
                    job_id = %ctx.job_id(),
                    reason = %failure.reason,
                    error_code = failure.source.code(),
                    "Pipeline and fallback both failed"
                );
                JobResult::Failed(failure.to_string())
            }
        }
    }
}

/// Deterministic placeholder result used while the breaker is degraded.
/// Makes no backend call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DegradedHandler;

impl DegradedHandler {
    pub fn stub_fields() -> StructuredFields {
        StructuredFields {
            chief_complaint: Some("[DEGRADED MODE] Servicio degradado temporalmente.".to_string()),
            diagnosis: Some(Diagnosis {
                text: Some("Servicio no disponible".to_string()),
                certainty: Some(DiagnosisCertainty::Syndromic),
                icd10: None,
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl JobHandler for DegradedHandler {
    fn name(&self) -> &'static str {
        "degraded"
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success(JobOutput {
            result: json!({
                "fields": Self::stub_fields(),
                "modelVersion": DEGRADED_MODEL_VERSION,
                "pipeline": null,
            }),
            fallback_used: true,
            contract_warnings: Vec::new(),
            inference_ms: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use medex_core::{ExtractorError, Speaker, Transcript, TranscriptSegment};
    use medex_inference::MockExtractionBackend;
    use medex_pipeline::PipelineConfig;

    fn job() -> Job {
        let transcript = Transcript::from_segments(
            vec![
                TranscriptSegment::new(Speaker::Doctor, "¿Qué le trae por aquí?", 0, 2000),
                TranscriptSegment::new(Speaker::Patient, "Me duele el oído derecho", 2000, 5000),
            ],
            "es",
        );
        Job::new("user-1", ExtractRequest::new(transcript), Utc::now())
    }

    #[tokio::test]
    async fn test_degraded_handler_stub() {
        let result = DegradedHandler.execute(JobContext::new(job())).await;
        let JobResult::Success(output) = result else {
            panic!("degraded handler must succeed");
        };
        assert!(output.fallback_used);
        assert_eq!(output.inference_ms, 0);
        assert_eq!(output.result["modelVersion"], "fallback-heuristic");
        assert_eq!(output.result["fields"]["diagnosis"]["certainty"], "syndromic");
    }

    #[tokio::test]
    async fn test_pipeline_handler_success() {
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            Arc::new(MockExtractionBackend::new()),
            PipelineConfig::default(),
        ));
        let handler = PipelineHandler::new(orchestrator);

        let JobResult::Success(output) = handler.execute(JobContext::new(job())).await else {
            panic!("pipeline should succeed with the mock backend");
        };
        assert!(!output.fallback_used);
        assert_eq!(
            output.result["fields"]["chiefComplaint"],
            "Me duele el oído derecho"
        );
        assert_eq!(output.result["pipeline"]["pipelineUsed"], "orl_map_reduce");
    }

    #[tokio::test]
    async fn test_pipeline_handler_failure() {
        let backend = MockExtractionBackend::new()
            .with_chunk_failure(0, ExtractorError::RateLimited)
            .with_full_failure(ExtractorError::RateLimited);
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            Arc::new(backend),
            PipelineConfig::default(),
        ));

        let result = PipelineHandler::new(orchestrator)
            .execute(JobContext::new(job()))
            .await;
        assert_eq!(
            result,
            JobResult::Failed(
                "fallback extraction failed after error_RateLimited: Backend rate limited".into()
            )
        );
    }
}
