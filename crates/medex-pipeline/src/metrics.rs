//! Per-run pipeline metrics.
//!
//! Built incrementally across stages and returned with the result. Stage
//! timings are recorded on success and failure alike, so partial timing is
//! available even when the run ends in the fallback.

use medex_core::defaults::{PIPELINE_LABEL_FALLBACK, PIPELINE_LABEL_STAGED};
use medex_core::{ContractStatus, EvidenceSnippet};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tokio::time::Instant;

/// Which path produced the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PipelinePath {
    #[default]
    #[serde(rename = "orl_map_reduce")]
    Staged,
    #[serde(rename = "fallback_baseline")]
    Fallback,
}

impl PipelinePath {
    pub fn label(self) -> &'static str {
        match self {
            PipelinePath::Staged => PIPELINE_LABEL_STAGED,
            PipelinePath::Fallback => PIPELINE_LABEL_FALLBACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preprocess,
    DriftCheck,
    Chunk,
    Map,
    Reduce,
    Refine,
    Fallback,
}

/// Elapsed milliseconds per stage; `None` for stages never entered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    pub preprocess: Option<u64>,
    pub drift_check: Option<u64>,
    pub chunk: Option<u64>,
    pub map: Option<u64>,
    pub reduce: Option<u64>,
    pub refine: Option<u64>,
    pub fallback: Option<u64>,
}

impl StageTimings {
    pub fn get(&self, stage: Stage) -> Option<u64> {
        match stage {
            Stage::Preprocess => self.preprocess,
            Stage::DriftCheck => self.drift_check,
            Stage::Chunk => self.chunk,
            Stage::Map => self.map,
            Stage::Reduce => self.reduce,
            Stage::Refine => self.refine,
            Stage::Fallback => self.fallback,
        }
    }

    fn set(&mut self, stage: Stage, ms: u64) {
        let slot = match stage {
            Stage::Preprocess => &mut self.preprocess,
            Stage::DriftCheck => &mut self.drift_check,
            Stage::Chunk => &mut self.chunk,
            Stage::Map => &mut self.map,
            Stage::Reduce => &mut self.reduce,
            Stage::Refine => &mut self.refine,
            Stage::Fallback => &mut self.fallback,
        };
        *slot = Some(ms);
    }
}

/// Sanitized evidence for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEvidence {
    pub chunk_index: usize,
    pub snippets: Vec<EvidenceSnippet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineMetrics {
    pub pipeline_used: PipelinePath,
    pub chunk_count: usize,
    pub normalization_replacements: usize,
    pub stage_ms: StageTimings,
    pub fallback_reason: Option<String>,
    pub refinement_error: Option<String>,
    pub contract_warnings: Vec<String>,
    pub contract_status: ContractStatus,
    pub conflict_count: usize,
    pub model_version: Option<String>,
    pub total_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<ChunkEvidence>,
    #[serde(skip)]
    in_flight: Option<(Stage, Instant)>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing `stage`, closing any stage still in flight.
    pub fn begin(&mut self, stage: Stage) {
        self.close_in_flight();
        self.in_flight = Some((stage, Instant::now()));
    }

    /// Record the elapsed time of the stage in flight, if any.
    pub fn close_in_flight(&mut self) {
        if let Some((stage, started)) = self.in_flight.take() {
            self.stage_ms.set(stage, elapsed_ms(started));
        }
    }

    pub fn fallback_used(&self) -> bool {
        self.pipeline_used == PipelinePath::Fallback
    }

    /// Loosely-typed form for the API boundary.
    pub fn to_wire(&self) -> JsonValue {
        let mut wire = json!({
            "pipelineUsed": self.pipeline_used.label(),
            "chunksCount": self.chunk_count,
            "normalizationReplacements": self.normalization_replacements,
            "stageMs": self.stage_ms,
            "fallbackReason": self.fallback_reason,
            "refinementError": self.refinement_error,
            "contractWarnings": self.contract_warnings,
            "contractStatus": self.contract_status.to_string(),
            "conflictCount": self.conflict_count,
            "modelVersion": self.model_version,
            "totalPipelineMs": self.total_ms,
        });
        if !self.evidence.is_empty() {
            wire["evidence"] = json!(self.evidence);
        }
        wire
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
