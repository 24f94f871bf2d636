//! Intermediate contract-drift handling and default collaborators.

use std::time::Duration;

use medex_core::defaults::DRIFT_TELEMETRY_EVENT;
use medex_core::{
    ContractGuard, DriftGuardMode, DriftReport, ExtractorResult, Preprocessed, TelemetryEmitter,
    Transcript, TranscriptPreprocessor,
};
use serde_json::json;
use tracing::warn;

/// Guard that never reports drift.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopContractGuard;

impl ContractGuard for NoopContractGuard {
    fn check_drift(&self) -> DriftReport {
        DriftReport::clean()
    }
}

/// Preprocessor that returns the transcript unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityPreprocessor;

impl TranscriptPreprocessor for IdentityPreprocessor {
    fn preprocess(&self, transcript: &Transcript) -> ExtractorResult<Preprocessed> {
        Ok(Preprocessed {
            transcript: transcript.clone(),
            replacements: 0,
        })
    }
}

/// What the pipeline does after the drift check.
#[derive(Debug, Clone, PartialEq)]
pub enum DriftDecision {
    /// Mode is `off`; no check was made.
    Skipped,
    /// Continue with the staged pipeline.
    Continue(DriftReport),
    /// Abandon the staged pipeline before chunking.
    ForceFallback(DriftReport),
}

impl DriftDecision {
    pub fn report(&self) -> Option<&DriftReport> {
        match self {
            DriftDecision::Skipped => None,
            DriftDecision::Continue(r) | DriftDecision::ForceFallback(r) => Some(r),
        }
    }
}

/// Run the contract check under `mode`, emitting telemetry when the report
/// is not clean.
///
/// Only genuine hash drift forces the fallback, and only in safe mode; a
/// missing or invalid snapshot is reported but never blocks.
pub fn evaluate_drift(
    mode: DriftGuardMode,
    guard: &dyn ContractGuard,
    telemetry: &dyn TelemetryEmitter,
    cooldown: Duration,
) -> DriftDecision {
    if mode == DriftGuardMode::Off {
        return DriftDecision::Skipped;
    }

    let report = guard.check_drift();
    if report.is_clean() {
        return DriftDecision::Continue(report);
    }

    warn!(
        subsystem = "pipeline",
        component = "drift_guard",
        mode = %mode,
        warning_count = report.warnings.len(),
        has_real_drift = report.has_real_drift,
        "Contract drift check reported warnings"
    );
    telemetry.emit(
        DRIFT_TELEMETRY_EVENT,
        json!({
            "mode": mode.to_string(),
            "warnings": report.warnings,
            "hasRealDrift": report.has_real_drift,
            "details": report.details,
        }),
        cooldown,
    );

    if mode == DriftGuardMode::Safe && report.has_real_drift {
        DriftDecision::ForceFallback(report)
    } else {
        DriftDecision::Continue(report)
    }
}
