//! # medex-inference
//!
//! Inference-side building blocks for medex:
//! - Deterministic mock collaborators for tests and local runs
//! - Latency statistics and moving-average windows
//! - PHI-safe evidence snippet sanitizing

pub mod evidence;
pub mod latency;
pub mod mock;

pub use evidence::{sanitize_evidence, sanitize_snippets};
pub use latency::{LatencyStats, SampleWindow};
pub use mock::{
    heuristic_fields, MockCall, MockContractGuard, MockExtractionBackend, MockRefiner, MockTelemetry,
};
