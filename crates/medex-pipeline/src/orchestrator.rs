//! Staged extraction pipeline with timeouts and a single-shot fallback.
//!
//! Stage order: preprocess → drift check → chunk → map → reduce → refine.
//! The whole sequence runs under one global deadline and one process-wide
//! permit. Any stage error, the first chunk timeout, or the global timeout
//! abandons the staged attempt in favor of one full-transcript extraction,
//! tagged with a fallback reason. Refinement failures are never fatal.

use std::sync::Arc;

use medex_core::{
    ContractGuard, ContractStatus, ExtractRequest, ExtractionBackend, ExtractorError, LogTelemetry,
    Refiner, StructuredFields, TelemetryEmitter, TranscriptPreprocessor,
};
use medex_inference::sanitize_snippets;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, instrument, warn};

use crate::chunking::chunk_transcript;
use crate::config::PipelineConfig;
use crate::drift::{evaluate_drift, DriftDecision, IdentityPreprocessor, NoopContractGuard};
use crate::error::{PipelineFailure, StageError};
use crate::metrics::{elapsed_ms, ChunkEvidence, PipelineMetrics, PipelinePath, Stage};
use crate::reducer::reduce;

/// Result of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub fields: StructuredFields,
    pub metrics: PipelineMetrics,
}

impl PipelineOutput {
    pub fn fallback_used(&self) -> bool {
        self.metrics.fallback_used()
    }
}

/// Composes chunking, per-chunk extraction, reduction, and refinement into
/// one timed, fallback-capable operation.
pub struct PipelineOrchestrator {
    backend: Arc<dyn ExtractionBackend>,
    refiner: Option<Arc<dyn Refiner>>,
    guard: Arc<dyn ContractGuard>,
    preprocessor: Arc<dyn TranscriptPreprocessor>,
    telemetry: Arc<dyn TelemetryEmitter>,
    config: PipelineConfig,
    permit: Semaphore,
}

impl PipelineOrchestrator {
    /// Create an orchestrator with no refiner, no drift guard, an identity
    /// preprocessor, and log-backed telemetry.
    pub fn new(backend: Arc<dyn ExtractionBackend>, config: PipelineConfig) -> Self {
        Self {
            backend,
            refiner: None,
            guard: Arc::new(NoopContractGuard),
            preprocessor: Arc::new(IdentityPreprocessor),
            telemetry: Arc::new(LogTelemetry::new()),
            config,
            permit: Semaphore::new(1),
        }
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn Refiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn with_contract_guard(mut self, guard: Arc<dyn ContractGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn TranscriptPreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryEmitter>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline for one request.
    ///
    /// Returns `Err` only when the staged attempt and the fallback both fail.
    #[instrument(skip(self, request), fields(segments = request.transcript.segments.len()))]
    pub async fn run(&self, request: &ExtractRequest) -> Result<PipelineOutput, PipelineFailure> {
        let _permit = match self.permit.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return Err(PipelineFailure {
                    reason: "permit_closed".to_string(),
                    source: ExtractorError::BackendUnavailable("pipeline permit closed".into()),
                    metrics: PipelineMetrics::new(),
                })
            }
        };

        let started = Instant::now();
        let mut metrics = PipelineMetrics::new();

        let staged = timeout(
            self.config.pipeline_timeout,
            self.run_staged(request, &mut metrics),
        )
        .await;
        metrics.close_in_flight();

        let outcome = match staged {
            Ok(result) => result,
            Err(_) => Err(StageError::PipelineTimeout),
        };

        match outcome {
            Ok(fields) => {
                metrics.pipeline_used = PipelinePath::Staged;
                metrics.total_ms = elapsed_ms(started);
                info!(
                    subsystem = "pipeline",
                    component = "orchestrator",
                    op = "run",
                    pipeline = metrics.pipeline_used.label(),
                    chunk_count = metrics.chunk_count,
                    conflict_count = metrics.conflict_count,
                    contract_status = %metrics.contract_status,
                    duration_ms = metrics.total_ms,
                    "Pipeline completed"
                );
                Ok(PipelineOutput { fields, metrics })
            }
            Err(cause) => self.run_fallback(request, metrics, cause, started).await,
        }
    }

    async fn run_staged(
        &self,
        request: &ExtractRequest,
        metrics: &mut PipelineMetrics,
    ) -> Result<StructuredFields, StageError> {
        metrics.begin(Stage::Preprocess);
        let preprocessed = self.preprocessor.preprocess(&request.transcript)?;
        metrics.normalization_replacements = preprocessed.replacements;

        metrics.begin(Stage::DriftCheck);
        let decision = evaluate_drift(
            self.config.drift_mode,
            self.guard.as_ref(),
            self.telemetry.as_ref(),
            self.config.drift_cooldown,
        );
        if let Some(report) = decision.report() {
            metrics.contract_warnings = report.warnings.clone();
            metrics.contract_status = ContractStatus::from_report(report);
        }
        if let DriftDecision::ForceFallback(_) = decision {
            return Err(StageError::ContractDrift);
        }

        metrics.begin(Stage::Chunk);
        let chunks = chunk_transcript(&preprocessed.transcript, &self.config.chunking);
        metrics.chunk_count = chunks.len();
        debug!(subsystem = "pipeline", chunk_count = chunks.len(), "Transcript chunked");

        metrics.begin(Stage::Map);
        let mut results = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let call = self
                .backend
                .extract_chunk(chunk, index, &request.context);
            match timeout(self.config.chunk_timeout, call).await {
                Ok(Ok(extraction)) => results.push(extraction.result),
                Ok(Err(e)) => {
                    warn!(subsystem = "pipeline", chunk_index = index, error_code = e.code(), "Chunk extraction failed");
                    return Err(e.into());
                }
                Err(_) => {
                    warn!(
                        subsystem = "pipeline",
                        chunk_index = index,
                        timeout_ms = self.config.chunk_timeout.as_millis() as u64,
                        "Chunk extraction timed out"
                    );
                    return Err(StageError::ChunkTimeout { index });
                }
            }
        }
        results.sort_by_key(|r| r.chunk_index);

        if self.config.include_evidence {
            metrics.evidence = results
                .iter()
                .map(|r| ChunkEvidence {
                    chunk_index: r.chunk_index,
                    snippets: sanitize_snippets(&r.evidence, self.config.max_evidence_per_chunk),
                })
                .filter(|e| !e.snippets.is_empty())
                .collect();
        }

        metrics.begin(Stage::Reduce);
        let partials: Vec<StructuredFields> = results.into_iter().map(|r| r.fields).collect();
        let intermediate = reduce(&partials);
        metrics.conflict_count = intermediate.conflict_count();
        let merged = intermediate.into_fields();

        let Some(refiner) = &self.refiner else {
            return Ok(merged);
        };
        metrics.begin(Stage::Refine);
        match timeout(self.config.refine_timeout, refiner.refine(&merged)).await {
            Ok(Ok(refined)) => Ok(refined),
            Ok(Err(e)) => {
                warn!(subsystem = "pipeline", error_code = e.code(), "Refinement failed, keeping merged result");
                metrics.refinement_error = Some(format!("error_{}", e.kind()));
                Ok(merged)
            }
            Err(_) => {
                warn!(subsystem = "pipeline", "Refinement timed out, keeping merged result");
                metrics.refinement_error = Some("timeout_refine".to_string());
                Ok(merged)
            }
        }
    }

    async fn run_fallback(
        &self,
        request: &ExtractRequest,
        mut metrics: PipelineMetrics,
        cause: StageError,
        started: Instant,
    ) -> Result<PipelineOutput, PipelineFailure> {
        let reason = cause.fallback_reason();
        warn!(
            subsystem = "pipeline",
            component = "orchestrator",
            op = "fallback",
            reason = %reason,
            "Staged pipeline abandoned, running fallback extraction"
        );

        metrics.pipeline_used = PipelinePath::Fallback;
        metrics.fallback_reason = Some(reason.clone());
        metrics.begin(Stage::Fallback);

        let call = self
            .backend
            .extract_full(&request.transcript, &request.context);
        let outcome = timeout(self.config.fallback_timeout, call).await;
        metrics.close_in_flight();
        metrics.total_ms = elapsed_ms(started);

        let source = match outcome {
            Ok(Ok(full)) => {
                metrics.model_version = Some(full.model_version);
                info!(
                    subsystem = "pipeline",
                    component = "orchestrator",
                    op = "fallback",
                    reason = %reason,
                    duration_ms = metrics.total_ms,
                    "Fallback extraction completed"
                );
                return Ok(PipelineOutput {
                    fields: full.fields,
                    metrics,
                });
            }
            Ok(Err(e)) => e,
            Err(_) => ExtractorError::Timeout(self.config.fallback_timeout.as_millis() as u64),
        };

        warn!(
            subsystem = "pipeline",
            reason = %reason,
            error_code = source.code(),
            "Fallback extraction failed"
        );
        Err(PipelineFailure {
            reason,
            source,
            metrics,
        })
    }
}
