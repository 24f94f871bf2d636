//! # medex-core
//!
//! Core types, traits, and abstractions for the medex extraction orchestrator.
//!
//! This crate provides the foundational data structures (transcripts,
//! structured clinical fields, jobs, metrics snapshots), the error taxonomy,
//! and the collaborator traits that the pipeline and job crates depend on.

pub mod config;
pub mod defaults;
pub mod error;
pub mod models;
pub mod telemetry;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::DriftGuardMode;
pub use error::{Error, ExtractorError, Result};
pub use models::*;
pub use telemetry::LogTelemetry;
pub use traits::*;
