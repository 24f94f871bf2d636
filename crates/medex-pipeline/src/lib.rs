//! # medex-pipeline
//!
//! Staged transcript extraction for medex.
//!
//! This crate provides:
//! - Boundary-respecting transcript chunking
//! - Deterministic reduction of per-chunk results with conflict markers
//! - Cleanup of placeholder and blank values in the merged record
//! - Contract drift evaluation
//! - The pipeline orchestrator with per-stage timeouts and fallback

pub mod chunking;
pub mod config;
pub mod drift;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod reducer;
pub mod sanitizer;

pub use chunking::{chunk_stats, chunk_transcript, estimate_tokens, ChunkStats, ChunkingConfig};
pub use config::PipelineConfig;
pub use drift::{evaluate_drift, DriftDecision, IdentityPreprocessor, NoopContractGuard};
pub use error::{PipelineFailure, StageError};
pub use metrics::{ChunkEvidence, PipelineMetrics, PipelinePath, Stage, StageTimings};
pub use orchestrator::{PipelineOrchestrator, PipelineOutput};
pub use reducer::{reduce, ConflictMarker, IntermediateResult, MergeStrategy};
pub use sanitizer::{sanitize_fields, sanitize_value};
