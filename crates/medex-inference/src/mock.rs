//! Mock collaborators for deterministic testing.
//!
//! Provides builder-configured stand-ins for the extraction backend, the
//! refiner, the contract guard, and the telemetry sink.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use medex_core::{ExtractorError, StructuredFields};
//! use medex_inference::mock::MockExtractionBackend;
//!
//! let backend = MockExtractionBackend::new()
//!     .with_chunk_delay_ms(1, 90_000)
//!     .with_chunk_failure(2, ExtractorError::RateLimited);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use medex_core::{
    ChunkExtraction, ChunkExtractionResult, ContractGuard, DriftReport, EvidenceSnippet,
    ExtractionBackend, ExtractionContext, ExtractorError, ExtractorResult, FullExtraction,
    Refiner, Speaker, StructuredFields, TelemetryEmitter, Transcript,
};
use serde_json::Value as JsonValue;

const CHIEF_COMPLAINT_MAX_CHARS: usize = 120;

/// Mock extraction backend for testing.
#[derive(Clone)]
pub struct MockExtractionBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    chunk_fields: HashMap<usize, StructuredFields>,
    chunk_evidence: HashMap<usize, Vec<EvidenceSnippet>>,
    chunk_failures: HashMap<usize, ExtractorError>,
    chunk_delays_ms: HashMap<usize, u64>,
    full_fields: Option<StructuredFields>,
    full_failure: Option<ExtractorError>,
    full_delay_ms: u64,
    reported_duration_ms: u64,
    model_version: String,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub chunk_index: Option<usize>,
    pub segment_count: usize,
    pub timestamp: Instant,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            chunk_fields: HashMap::new(),
            chunk_evidence: HashMap::new(),
            chunk_failures: HashMap::new(),
            chunk_delays_ms: HashMap::new(),
            full_fields: None,
            full_failure: None,
            full_delay_ms: 0,
            reported_duration_ms: 0,
            model_version: "mock-extractor-v1".to_string(),
        }
    }
}

impl Default for MockExtractionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExtractionBackend {
    /// Create a new mock backend. Unconfigured calls derive fields from
    /// the patient's own words.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fixed fields for the chunk at `index`.
    pub fn with_chunk_fields(mut self, index: usize, fields: StructuredFields) -> Self {
        Arc::make_mut(&mut self.config)
            .chunk_fields
            .insert(index, fields);
        self
    }

    /// Evidence returned with the chunk at `index`.
    pub fn with_chunk_evidence(mut self, index: usize, evidence: Vec<EvidenceSnippet>) -> Self {
        Arc::make_mut(&mut self.config)
            .chunk_evidence
            .insert(index, evidence);
        self
    }

    /// Make the chunk at `index` fail.
    pub fn with_chunk_failure(mut self, index: usize, error: ExtractorError) -> Self {
        Arc::make_mut(&mut self.config)
            .chunk_failures
            .insert(index, error);
        self
    }

    /// Delay the chunk at `index` (tokio time, so paused clocks apply).
    pub fn with_chunk_delay_ms(mut self, index: usize, delay_ms: u64) -> Self {
        Arc::make_mut(&mut self.config)
            .chunk_delays_ms
            .insert(index, delay_ms);
        self
    }

    /// Fixed fields for full extractions.
    pub fn with_full_fields(mut self, fields: StructuredFields) -> Self {
        Arc::make_mut(&mut self.config).full_fields = Some(fields);
        self
    }

    /// Make full extractions fail.
    pub fn with_full_failure(mut self, error: ExtractorError) -> Self {
        Arc::make_mut(&mut self.config).full_failure = Some(error);
        self
    }

    /// Delay full extractions.
    pub fn with_full_delay_ms(mut self, delay_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).full_delay_ms = delay_ms;
        self
    }

    /// Duration reported by every call, independent of real delay.
    pub fn with_reported_duration_ms(mut self, duration_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).reported_duration_ms = duration_ms;
        self
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model_version = version.into();
        self
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.call_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear the call log.
    pub fn clear_calls(&self) {
        self.call_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear()
    }

    /// Number of chunk extraction calls.
    pub fn chunk_call_count(&self) -> usize {
        self.count_calls("extract_chunk")
    }

    /// Number of full extraction calls.
    pub fn full_call_count(&self) -> usize {
        self.count_calls("extract_full")
    }

    fn count_calls(&self, operation: &str) -> usize {
        self.call_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn log_call(&self, operation: &str, chunk_index: Option<usize>, transcript: &Transcript) {
        self.call_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockCall {
                operation: operation.to_string(),
                chunk_index,
                segment_count: transcript.segments.len(),
                timestamp: Instant::now(),
            });
    }
}

/// Deterministic fields from a transcript: the first patient utterance as
/// chief complaint, all patient utterances as present illness.
pub fn heuristic_fields(transcript: &Transcript) -> StructuredFields {
    let patient_lines: Vec<&str> = transcript
        .segments
        .iter()
        .filter(|s| s.speaker == Speaker::Patient)
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect();

    StructuredFields {
        chief_complaint: patient_lines
            .first()
            .map(|t| t.chars().take(CHIEF_COMPLAINT_MAX_CHARS).collect()),
        present_illness: (!patient_lines.is_empty()).then(|| patient_lines.join(" ")),
        ..Default::default()
    }
}

fn heuristic_evidence(transcript: &Transcript) -> Vec<EvidenceSnippet> {
    transcript
        .segments
        .iter()
        .find(|s| s.speaker == Speaker::Patient && !s.text.trim().is_empty())
        .map(|s| {
            vec![EvidenceSnippet {
                text: s.text.clone(),
                field_path: "chiefComplaint".to_string(),
            }]
        })
        .unwrap_or_default()
}

#[async_trait]
impl ExtractionBackend for MockExtractionBackend {
    async fn extract_chunk(
        &self,
        chunk: &Transcript,
        chunk_index: usize,
        _context: &ExtractionContext,
    ) -> ExtractorResult<ChunkExtraction> {
        self.log_call("extract_chunk", Some(chunk_index), chunk);

        if let Some(delay) = self.config.chunk_delays_ms.get(&chunk_index) {
            tokio::time::sleep(Duration::from_millis(*delay)).await;
        }
        if let Some(error) = self.config.chunk_failures.get(&chunk_index) {
            return Err(error.clone());
        }

        let fields = self
            .config
            .chunk_fields
            .get(&chunk_index)
            .cloned()
            .unwrap_or_else(|| heuristic_fields(chunk));
        let evidence = self
            .config
            .chunk_evidence
            .get(&chunk_index)
            .cloned()
            .unwrap_or_else(|| heuristic_evidence(chunk));

        Ok(ChunkExtraction {
            result: ChunkExtractionResult {
                chunk_index,
                fields,
                evidence,
            },
            duration_ms: self.config.reported_duration_ms,
        })
    }

    async fn extract_full(
        &self,
        transcript: &Transcript,
        _context: &ExtractionContext,
    ) -> ExtractorResult<FullExtraction> {
        self.log_call("extract_full", None, transcript);

        if self.config.full_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.full_delay_ms)).await;
        }
        if let Some(error) = &self.config.full_failure {
            return Err(error.clone());
        }

        Ok(FullExtraction {
            fields: self
                .config
                .full_fields
                .clone()
                .unwrap_or_else(|| heuristic_fields(transcript)),
            duration_ms: self.config.reported_duration_ms,
            model_version: self.config.model_version.clone(),
        })
    }
}

#[derive(Debug, Clone)]
enum RefineBehavior {
    Passthrough,
    Fixed(StructuredFields),
    Fail(ExtractorError),
}

/// Mock refiner. Passes input through unless configured otherwise.
#[derive(Debug, Clone)]
pub struct MockRefiner {
    behavior: RefineBehavior,
    delay_ms: u64,
    calls: Arc<AtomicUsize>,
}

impl Default for MockRefiner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRefiner {
    pub fn new() -> Self {
        Self {
            behavior: RefineBehavior::Passthrough,
            delay_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_fixed_result(mut self, fields: StructuredFields) -> Self {
        self.behavior = RefineBehavior::Fixed(fields);
        self
    }

    pub fn with_failure(mut self, error: ExtractorError) -> Self {
        self.behavior = RefineBehavior::Fail(error);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Refiner for MockRefiner {
    async fn refine(&self, merged: &StructuredFields) -> ExtractorResult<StructuredFields> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        match &self.behavior {
            RefineBehavior::Passthrough => Ok(merged.clone()),
            RefineBehavior::Fixed(fields) => Ok(fields.clone()),
            RefineBehavior::Fail(error) => Err(error.clone()),
        }
    }
}

/// Contract guard returning a fixed report and counting checks.
#[derive(Debug, Clone, Default)]
pub struct MockContractGuard {
    report: DriftReport,
    checks: Arc<AtomicUsize>,
}

impl MockContractGuard {
    pub fn new(report: DriftReport) -> Self {
        Self {
            report,
            checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Guard reporting genuine hash drift.
    pub fn drifted() -> Self {
        Self::new(DriftReport {
            warnings: vec!["DRIFT:intermediate_contract_hash".to_string()],
            has_real_drift: true,
            details: serde_json::json!({"expected": "a1", "actual": "b2"}),
        })
    }

    /// Guard reporting a missing snapshot, which is not genuine drift.
    pub fn snapshot_missing() -> Self {
        Self::new(DriftReport {
            warnings: vec!["intermediate_snapshot_missing".to_string()],
            has_real_drift: false,
            details: JsonValue::Null,
        })
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl ContractGuard for MockContractGuard {
    fn check_drift(&self) -> DriftReport {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.report.clone()
    }
}

/// Telemetry sink that records every event it receives.
#[derive(Debug, Clone, Default)]
pub struct MockTelemetry {
    events: Arc<Mutex<Vec<(String, JsonValue)>>>,
}

impl MockTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, JsonValue)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }
}

impl TelemetryEmitter for MockTelemetry {
    fn emit(&self, event: &str, payload: JsonValue, _cooldown: Duration) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.to_string(), payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medex_core::TranscriptSegment;

    fn transcript() -> Transcript {
        Transcript::from_segments(
            vec![
                TranscriptSegment::new(Speaker::Doctor, "¿Qué le pasa?", 0, 1000),
                TranscriptSegment::new(Speaker::Patient, "Me duele el oído", 1000, 3000),
                TranscriptSegment::new(Speaker::Patient, "desde hace tres días", 3000, 5000),
            ],
            "es",
        )
    }

    #[test]
    fn test_heuristic_fields() {
        let fields = heuristic_fields(&transcript());
        assert_eq!(fields.chief_complaint.as_deref(), Some("Me duele el oído"));
        assert_eq!(
            fields.present_illness.as_deref(),
            Some("Me duele el oído desde hace tres días")
        );
    }

    #[test]
    fn test_heuristic_fields_no_patient() {
        let t = Transcript::from_segments(
            vec![TranscriptSegment::new(Speaker::Doctor, "Buenos días", 0, 1000)],
            "es",
        );
        assert!(heuristic_fields(&t).is_empty());
    }

    #[tokio::test]
    async fn test_chunk_default_response() {
        let backend = MockExtractionBackend::new().with_reported_duration_ms(250);
        let out = backend
            .extract_chunk(&transcript(), 3, &ExtractionContext::default())
            .await
            .unwrap();
        assert_eq!(out.result.chunk_index, 3);
        assert_eq!(out.duration_ms, 250);
        assert_eq!(out.result.evidence.len(), 1);
        assert_eq!(backend.chunk_call_count(), 1);
        assert_eq!(backend.get_calls()[0].segment_count, 3);
    }

    #[tokio::test]
    async fn test_chunk_configured_failure() {
        let backend =
            MockExtractionBackend::new().with_chunk_failure(1, ExtractorError::RateLimited);
        let ctx = ExtractionContext::default();
        assert!(backend.extract_chunk(&transcript(), 0, &ctx).await.is_ok());
        assert_eq!(
            backend.extract_chunk(&transcript(), 1, &ctx).await.unwrap_err(),
            ExtractorError::RateLimited
        );
        assert_eq!(backend.chunk_call_count(), 2);
    }

    #[tokio::test]
    async fn test_full_fixed_and_model_version() {
        let fields = StructuredFields {
            prognosis: Some("bueno".into()),
            ..Default::default()
        };
        let backend = MockExtractionBackend::new()
            .with_full_fields(fields.clone())
            .with_model_version("m-2");
        let out = backend
            .extract_full(&transcript(), &ExtractionContext::default())
            .await
            .unwrap();
        assert_eq!(out.fields, fields);
        assert_eq!(out.model_version, "m-2");
        assert_eq!(backend.full_call_count(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_call_log() {
        let backend = MockExtractionBackend::new();
        let clone = backend.clone();
        clone
            .extract_full(&transcript(), &ExtractionContext::default())
            .await
            .unwrap();
        assert_eq!(backend.full_call_count(), 1);
        backend.clear_calls();
        assert_eq!(clone.full_call_count(), 0);
    }

    #[tokio::test]
    async fn test_refiner_behaviors() {
        let input = StructuredFields {
            chief_complaint: Some("x".into()),
            ..Default::default()
        };
        let pass = MockRefiner::new();
        assert_eq!(pass.refine(&input).await.unwrap(), input);
        assert_eq!(pass.call_count(), 1);

        let failing = MockRefiner::new().with_failure(ExtractorError::Timeout(10));
        assert!(failing.refine(&input).await.is_err());
    }

    #[test]
    fn test_contract_guard_counts_checks() {
        let guard = MockContractGuard::drifted();
        assert!(guard.check_drift().has_real_drift);
        assert!(!MockContractGuard::snapshot_missing().check_drift().has_real_drift);
        assert_eq!(guard.check_count(), 1);
    }

    #[test]
    fn test_telemetry_records() {
        let telemetry = MockTelemetry::new();
        telemetry.emit("a", serde_json::json!({"k": 1}), Duration::ZERO);
        telemetry.emit("a", serde_json::json!({}), Duration::ZERO);
        assert_eq!(telemetry.count("a"), 2);
        assert_eq!(telemetry.events()[0].1["k"], 1);
    }
}
