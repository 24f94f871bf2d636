//! Collaborator traits consumed by the pipeline and job crates.
//!
//! Implementations for real model serving live outside this workspace;
//! deterministic mocks live in `medex-inference`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::ExtractorError;
use crate::models::{
    ChunkExtraction, DriftReport, ExtractionContext, FullExtraction, StructuredFields, Transcript,
};

/// Result type for collaborator calls.
pub type ExtractorResult<T> = std::result::Result<T, ExtractorError>;

/// Model-serving backend able to extract structured fields.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Extract partial fields from one chunk.
    async fn extract_chunk(
        &self,
        chunk: &Transcript,
        chunk_index: usize,
        context: &ExtractionContext,
    ) -> ExtractorResult<ChunkExtraction>;

    /// Extract fields from the whole transcript in one call.
    async fn extract_full(
        &self,
        transcript: &Transcript,
        context: &ExtractionContext,
    ) -> ExtractorResult<FullExtraction>;
}

/// Best-effort post-processing of the merged fields.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, merged: &StructuredFields) -> ExtractorResult<StructuredFields>;
}

/// Read-only intermediate contract check. Must be side-effect free.
pub trait ContractGuard: Send + Sync {
    fn check_drift(&self) -> DriftReport;
}

/// Fire-and-forget telemetry. Implementations rate-limit per event name.
pub trait TelemetryEmitter: Send + Sync {
    fn emit(&self, event: &str, payload: JsonValue, cooldown: Duration);
}

/// Output of the domain pre-processing stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessed {
    pub transcript: Transcript,
    pub replacements: usize,
}

/// Domain text transformation applied before chunking.
pub trait TranscriptPreprocessor: Send + Sync {
    fn preprocess(&self, transcript: &Transcript) -> ExtractorResult<Preprocessed>;
}
