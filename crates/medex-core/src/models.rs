//! Core data models for medex.
//!
//! These types are shared across all medex crates. Wire names are camelCase.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

// =============================================================================
// TRANSCRIPT TYPES
// =============================================================================

/// Who is speaking in a transcript segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Doctor,
    Patient,
    #[default]
    Unknown,
}

/// One contiguous utterance with its offsets in the recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    #[serde(default)]
    pub speaker: Speaker,
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TranscriptSegment {
    pub fn new(speaker: Speaker, text: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            speaker,
            text: text.into(),
            start_ms,
            end_ms,
        }
    }
}

fn default_language() -> String {
    "es".to_string()
}

/// An ordered sequence of segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub segments: Vec<TranscriptSegment>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub duration_ms: u64,
}

impl Transcript {
    /// Build a transcript whose duration is the span of its segments.
    pub fn from_segments(segments: Vec<TranscriptSegment>, language: impl Into<String>) -> Self {
        let duration_ms = span_of(&segments);
        Self {
            segments,
            language: language.into(),
            duration_ms,
        }
    }

    /// End of the last segment minus start of the first (0 when empty).
    pub fn span_ms(&self) -> u64 {
        span_of(&self.segments)
    }

    /// Total characters across all segment texts.
    pub fn char_count(&self) -> usize {
        self.segments.iter().map(|s| s.text.chars().count()).sum()
    }
}

fn span_of(segments: &[TranscriptSegment]) -> u64 {
    match (segments.first(), segments.last()) {
        (Some(first), Some(last)) => last.end_ms.saturating_sub(first.start_ms),
        _ => 0,
    }
}

fn default_specialty() -> String {
    "ORL".to_string()
}

/// Clinical context accompanying an extraction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionContext {
    #[serde(default = "default_specialty")]
    pub specialty: String,
    #[serde(default)]
    pub encounter_type: Option<String>,
    #[serde(default)]
    pub patient_age: Option<u32>,
    #[serde(default)]
    pub patient_gender: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl Default for ExtractionContext {
    fn default() -> Self {
        Self {
            specialty: default_specialty(),
            encounter_type: None,
            patient_age: None,
            patient_gender: None,
            scope: None,
        }
    }
}

/// Payload submitted to the job manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub transcript: Transcript,
    #[serde(default)]
    pub context: ExtractionContext,
}

impl ExtractRequest {
    pub fn new(transcript: Transcript) -> Self {
        Self {
            transcript,
            context: ExtractionContext::default(),
        }
    }

    pub fn with_context(mut self, context: ExtractionContext) -> Self {
        self.context = context;
        self
    }
}

// =============================================================================
// STRUCTURED FIELD TYPES
// =============================================================================

/// Background history sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct History {
    pub family: Option<String>,
    pub non_pathological: Option<String>,
    pub pathological: Option<String>,
}

/// Physical examination findings, ENT-oriented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PhysicalExam {
    pub vital_signs: Option<String>,
    pub rhinoscopy: Option<String>,
    pub oropharynx: Option<String>,
    pub neck: Option<String>,
    pub laryngoscopy: Option<String>,
    pub otoscopy: Option<String>,
    pub otomicroscopy: Option<String>,
    pub nasal_endoscopy: Option<String>,
}

/// Certainty label for a diagnosis, ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosisCertainty {
    Definitive,
    Presumptive,
    Syndromic,
}

impl DiagnosisCertainty {
    /// Higher is more certain.
    pub fn rank(self) -> u8 {
        match self {
            Self::Definitive => 3,
            Self::Presumptive => 2,
            Self::Syndromic => 1,
        }
    }
}

impl fmt::Display for DiagnosisCertainty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Definitive => write!(f, "definitive"),
            Self::Presumptive => write!(f, "presumptive"),
            Self::Syndromic => write!(f, "syndromic"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Diagnosis {
    pub text: Option<String>,
    pub certainty: Option<DiagnosisCertainty>,
    pub icd10: Option<String>,
}

impl Diagnosis {
    pub fn is_empty(&self) -> bool {
        is_blank(&self.text) && self.certainty.is_none() && is_blank(&self.icd10)
    }
}

/// The structured clinical record extracted from a transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StructuredFields {
    pub chief_complaint: Option<String>,
    pub present_illness: Option<String>,
    pub history: History,
    pub physical_exam: PhysicalExam,
    pub diagnosis: Option<Diagnosis>,
    pub treatment_plan: Option<String>,
    pub prognosis: Option<String>,
    pub ordered_studies: Option<String>,
    pub additional_notes: Option<String>,
}

impl StructuredFields {
    /// True when no field carries a non-blank value.
    pub fn is_empty(&self) -> bool {
        is_blank(&self.chief_complaint)
            && is_blank(&self.present_illness)
            && self.history == History::default()
            && self.physical_exam == PhysicalExam::default()
            && self.diagnosis.as_ref().map_or(true, Diagnosis::is_empty)
            && is_blank(&self.treatment_plan)
            && is_blank(&self.prognosis)
            && is_blank(&self.ordered_studies)
            && is_blank(&self.additional_notes)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

// =============================================================================
// EXTRACTION RESULT TYPES
// =============================================================================

/// A short supporting quote for one extracted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSnippet {
    pub text: String,
    pub field_path: String,
}

/// Partial fields extracted from one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkExtractionResult {
    pub chunk_index: usize,
    pub fields: StructuredFields,
    #[serde(default)]
    pub evidence: Vec<EvidenceSnippet>,
}

/// Output of one per-chunk extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkExtraction {
    pub result: ChunkExtractionResult,
    pub duration_ms: u64,
}

/// Output of one full-transcript extraction call.
#[derive(Debug, Clone, PartialEq)]
pub struct FullExtraction {
    pub fields: StructuredFields,
    pub duration_ms: u64,
    pub model_version: String,
}

// =============================================================================
// CONTRACT DRIFT TYPES
// =============================================================================

/// Read-only result of an intermediate contract check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub warnings: Vec<String>,
    pub has_real_drift: bool,
    #[serde(default)]
    pub details: JsonValue,
}

impl DriftReport {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && !self.has_real_drift
    }
}

/// Summary status of contract warnings for a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    #[default]
    Ok,
    Warning,
    Drift,
}

impl ContractStatus {
    pub fn from_report(report: &DriftReport) -> Self {
        if report.has_real_drift {
            Self::Drift
        } else if !report.warnings.is_empty() {
            Self::Warning
        } else {
            Self::Ok
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Drift => write!(f, "drift"),
        }
    }
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// Job lifecycle: `queued → running → {done|failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    /// Queued or running; holds the owner's exclusivity slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// An extraction job owned by the job manager.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub request: ExtractRequest,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub fallback_used: bool,
    pub contract_warnings: Vec<String>,
}

impl Job {
    /// Create a queued job stamped with `created_at`.
    pub fn new(user_id: impl Into<String>, request: ExtractRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            request,
            status: JobStatus::Queued,
            created_at,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            fallback_used: false,
            contract_warnings: Vec::new(),
        }
    }
}

/// Read-only view of a job returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub position: Option<usize>,
    pub eta_seconds: Option<u64>,
    pub fallback_used: bool,
    pub contract_warnings: Vec<String>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
}

impl JobStatusView {
    /// Loosely-typed form for the API boundary.
    pub fn to_wire(&self) -> JsonValue {
        json!({
            "jobId": self.job_id.to_string(),
            "status": self.status.to_string(),
            "position": self.position,
            "etaSeconds": self.eta_seconds,
            "fallbackUsed": self.fallback_used,
            "contractWarnings": self.contract_warnings,
            "result": self.result,
            "error": self.error,
        })
    }
}

// =============================================================================
// OPERATIONAL METRICS TYPES
// =============================================================================

/// Admission state of the circuit breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerState {
    #[default]
    Enabled,
    Degraded,
    Disabled,
}

impl BreakerState {
    /// Degraded or disabled.
    pub fn is_restrictive(self) -> bool {
        !matches!(self, Self::Enabled)
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "enabled"),
            Self::Degraded => write!(f, "degraded"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub in_queue: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub fallbacks: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rates {
    pub fail_rate: f64,
    pub fallback_rate: f64,
}

impl Rates {
    /// `fail_rate = failed / (completed + failed)`,
    /// `fallback_rate = fallbacks / completed`; zero denominators give 0.
    pub fn compute(completed: u64, failed: u64, fallbacks: u64) -> Self {
        let attempted = completed + failed;
        let fail_rate = if attempted > 0 {
            failed as f64 / attempted as f64
        } else {
            0.0
        };
        let fallback_rate = if completed > 0 {
            fallbacks as f64 / completed as f64
        } else {
            0.0
        };
        Self {
            fail_rate,
            fallback_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: u64,
    pub p95: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySnapshot {
    pub inference: Percentiles,
    pub queue: Percentiles,
}

/// Point-in-time copy of job manager metrics.
///
/// Consumed by the alert engine and circuit breaker recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub jobs: JobCounts,
    pub rates: Rates,
    pub latency_ms: LatencySnapshot,
    pub maintenance_mode: bool,
    pub circuit_breaker_state: BreakerState,
    pub updated_at: DateTime<Utc>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            jobs: JobCounts::default(),
            rates: Rates::default(),
            latency_ms: LatencySnapshot::default(),
            maintenance_mode: false,
            circuit_breaker_state: BreakerState::Enabled,
            updated_at: Utc::now(),
        }
    }
}

impl MetricsSnapshot {
    /// Loosely-typed form for the API boundary.
    pub fn to_wire(&self) -> JsonValue {
        json!({
            "jobs": {
                "inQueue": self.jobs.in_queue,
                "active": self.jobs.active,
                "completed": self.jobs.completed,
                "failed": self.jobs.failed,
                "maintenanceMode": self.maintenance_mode,
                "circuitBreakerState": self.circuit_breaker_state.to_string(),
            },
            "latencyMs": {
                "inference": { "p50": self.latency_ms.inference.p50, "p95": self.latency_ms.inference.p95 },
                "queue": { "p50": self.latency_ms.queue.p50, "p95": self.latency_ms.queue.p95 },
            },
            "rates": {
                "failRate": self.rates.fail_rate,
                "fallbackRate": self.rates.fallback_rate,
            },
            "updatedAt": self.updated_at.to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: u64, end: u64) -> TranscriptSegment {
        TranscriptSegment::new(Speaker::Doctor, "hola", start, end)
    }

    #[test]
    fn test_transcript_span() {
        let t = Transcript::from_segments(vec![seg(1000, 2000), seg(2500, 9000)], "es");
        assert_eq!(t.span_ms(), 8000);
        assert_eq!(t.duration_ms, 8000);
    }

    #[test]
    fn test_transcript_span_empty() {
        let t = Transcript::from_segments(vec![], "es");
        assert_eq!(t.span_ms(), 0);
    }

    #[test]
    fn test_transcript_deserialize_defaults() {
        let t: Transcript = serde_json::from_value(json!({
            "segments": [{"text": "me duele el oído", "startMs": 0, "endMs": 1200}]
        }))
        .unwrap();
        assert_eq!(t.language, "es");
        assert_eq!(t.segments[0].speaker, Speaker::Unknown);
    }

    #[test]
    fn test_extract_request_context_default() {
        let req: ExtractRequest = serde_json::from_value(json!({
            "transcript": {"segments": [], "durationMs": 0}
        }))
        .unwrap();
        assert_eq!(req.context.specialty, "ORL");
    }

    #[test]
    fn test_structured_fields_camel_case() {
        let fields = StructuredFields {
            chief_complaint: Some("otalgia".into()),
            physical_exam: PhysicalExam {
                nasal_endoscopy: Some("normal".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json["chiefComplaint"], "otalgia");
        assert_eq!(json["physicalExam"]["nasalEndoscopy"], "normal");
    }

    #[test]
    fn test_structured_fields_is_empty() {
        assert!(StructuredFields::default().is_empty());
        let blank = StructuredFields {
            chief_complaint: Some("   ".into()),
            ..Default::default()
        };
        assert!(blank.is_empty());
        let filled = StructuredFields {
            prognosis: Some("bueno".into()),
            ..Default::default()
        };
        assert!(!filled.is_empty());
    }

    #[test]
    fn test_certainty_rank_order() {
        assert!(DiagnosisCertainty::Definitive.rank() > DiagnosisCertainty::Presumptive.rank());
        assert!(DiagnosisCertainty::Presumptive.rank() > DiagnosisCertainty::Syndromic.rank());
    }

    #[test]
    fn test_contract_status_from_report() {
        assert_eq!(ContractStatus::from_report(&DriftReport::clean()), ContractStatus::Ok);
        let warn = DriftReport {
            warnings: vec!["snapshot_missing".into()],
            ..Default::default()
        };
        assert_eq!(ContractStatus::from_report(&warn), ContractStatus::Warning);
        let drift = DriftReport {
            warnings: vec!["DRIFT:hash".into()],
            has_real_drift: true,
            ..Default::default()
        };
        assert_eq!(ContractStatus::from_report(&drift), ContractStatus::Drift);
    }

    #[test]
    fn test_job_status_serialization() {
        let statuses = [
            (JobStatus::Queued, "queued"),
            (JobStatus::Running, "running"),
            (JobStatus::Done, "done"),
            (JobStatus::Failed, "failed"),
        ];
        for (status, expected) in statuses {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", expected));
            assert_eq!(status.to_string(), expected);
        }
    }

    #[test]
    fn test_job_status_active() {
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::Running.is_active());
        assert!(!JobStatus::Done.is_active());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_job_new_is_queued() {
        let job = Job::new("u1", ExtractRequest::new(Transcript::from_segments(vec![], "es")), Utc::now());
        assert_eq!(job.status, JobStatus::Queued);
        assert!(!job.fallback_used);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_rates_compute() {
        let rates = Rates::compute(8, 2, 4);
        assert!((rates.fail_rate - 0.2).abs() < f64::EPSILON);
        assert!((rates.fallback_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rates_compute_zero_volume() {
        let rates = Rates::compute(0, 0, 0);
        assert_eq!(rates.fail_rate, 0.0);
        assert_eq!(rates.fallback_rate, 0.0);
    }

    #[test]
    fn test_metrics_snapshot_to_wire() {
        let snapshot = MetricsSnapshot {
            jobs: JobCounts {
                in_queue: 3,
                active: 1,
                completed: 10,
                failed: 2,
                fallbacks: 1,
            },
            circuit_breaker_state: BreakerState::Degraded,
            ..Default::default()
        };
        let wire = snapshot.to_wire();
        assert_eq!(wire["jobs"]["inQueue"], 3);
        assert_eq!(wire["jobs"]["circuitBreakerState"], "degraded");
        assert_eq!(wire["latencyMs"]["inference"]["p95"], 0);
        assert!(wire["updatedAt"].is_string());
    }

    #[test]
    fn test_job_status_view_to_wire() {
        let view = JobStatusView {
            job_id: Uuid::nil(),
            status: JobStatus::Queued,
            position: Some(2),
            eta_seconds: Some(60),
            fallback_used: false,
            contract_warnings: vec![],
            result: None,
            error: None,
        };
        let wire = view.to_wire();
        assert_eq!(wire["status"], "queued");
        assert_eq!(wire["position"], 2);
        assert_eq!(wire["etaSeconds"], 60);
        assert!(wire["result"].is_null());
    }

    #[test]
    fn test_breaker_state_display() {
        assert_eq!(BreakerState::Enabled.to_string(), "enabled");
        assert!(BreakerState::Disabled.is_restrictive());
        assert!(!BreakerState::Enabled.is_restrictive());
    }
}
