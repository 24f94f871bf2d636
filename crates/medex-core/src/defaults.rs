//! Centralized default constants for the medex system.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in every crate fall back to these when the corresponding
//! environment variable is absent or unparseable.

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum span of one chunk (end of last segment minus start of first).
pub const CHUNK_MAX_DURATION_MS: u64 = 300_000;

/// Hard cap on estimated tokens per chunk.
pub const CHUNK_HARD_TOKEN_LIMIT: usize = 2048;

/// Soft duration cap; closes a chunk earlier than the hard duration limit.
pub const CHUNK_SOFT_DURATION_MS: u64 = 180_000;

/// Minimum segments a chunk must hold before the token or soft limit may close it.
pub const CHUNK_MIN_SEGMENTS: usize = 1;

/// Rough characters-per-token ratio for Spanish clinical text.
pub const CHARS_PER_TOKEN: usize = 4;

/// Token overhead added per segment for the speaker label.
pub const SPEAKER_TOKEN_OVERHEAD: usize = 2;

// =============================================================================
// REDUCER
// =============================================================================

/// Separator used when concatenating distinct field values.
pub const REDUCE_SEPARATOR: &str = " | ";

// =============================================================================
// PIPELINE
// =============================================================================

/// Global deadline for one staged pipeline run.
pub const PIPELINE_TIMEOUT_SECS: u64 = 120;

/// Deadline for each per-chunk extraction call.
pub const PIPELINE_CHUNK_TIMEOUT_SECS: u64 = 60;

/// Deadline for the refinement call.
pub const PIPELINE_REFINE_TIMEOUT_SECS: u64 = 45;

/// Deadline for the single-shot fallback extraction.
pub const PIPELINE_FALLBACK_TIMEOUT_SECS: u64 = 120;

/// Cooldown between repeated drift telemetry events.
pub const DRIFT_GUARD_COOLDOWN_SECS: u64 = 3600;

/// Telemetry event name for detected contract drift.
pub const DRIFT_TELEMETRY_EVENT: &str = "contract_drift_detected";

/// Maximum evidence snippets kept per chunk.
pub const EVIDENCE_MAX_SNIPPETS_PER_CHUNK: usize = 5;

/// Maximum characters in a sanitized evidence snippet.
pub const EVIDENCE_MAX_CHARS: usize = 160;

/// Pipeline label for the staged path.
pub const PIPELINE_LABEL_STAGED: &str = "orl_map_reduce";

/// Pipeline label for the single-shot fallback path.
pub const PIPELINE_LABEL_FALLBACK: &str = "fallback_baseline";

// =============================================================================
// JOBS
// =============================================================================

/// Per-user daily submission quota.
pub const JOB_DAILY_QUOTA: u32 = 10;

/// Seconds after creation before a job is garbage-collected.
pub const JOB_TTL_SECS: u64 = 1800;

/// Number of recent inference durations used for the ETA average.
pub const JOB_ETA_WINDOW: usize = 10;

/// ETA per queued job when no inference history exists.
pub const JOB_DEFAULT_ETA_SECS: u64 = 30;

/// Maximum latency samples retained for percentile metrics.
pub const JOB_LATENCY_SAMPLES: usize = 1000;

/// Idle maintenance tick (TTL sweep, alert and recovery evaluation).
pub const JOB_MAINTENANCE_TICK_SECS: u64 = 60;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Model label reported by the degraded-mode stub.
pub const DEGRADED_MODEL_VERSION: &str = "fallback-heuristic";

// =============================================================================
// CIRCUIT BREAKER
// =============================================================================

/// Base cooldown before an automatic recovery step.
pub const CIRCUIT_BREAKER_COOLDOWN_SECS: u64 = 300;

/// Failure rate below which Degraded may recover to Enabled.
pub const CIRCUIT_BREAKER_RECOVERY_FAILURE_THRESHOLD: f64 = 0.05;

/// Cap on the backoff exponent (cooldown × 2^min(attempts, cap)).
pub const CIRCUIT_BREAKER_MAX_BACKOFF_EXPONENT: u32 = 10;

// =============================================================================
// ALERTING
// =============================================================================

/// Failure rate above which a critical alert fires.
pub const ALERT_FAILURE_RATE_THRESHOLD: f64 = 0.10;

/// Fallback rate above which a warning fires.
pub const ALERT_FALLBACK_RATE_THRESHOLD: f64 = 0.20;

/// Minimum finished jobs before rate rules are evaluated.
pub const ALERT_MIN_VOLUME: u64 = 5;

/// Inference p95 (ms) above which a warning fires.
pub const ALERT_INFERENCE_P95_MS: u64 = 45_000;

/// Queue-wait p95 (ms) above which a warning fires.
pub const ALERT_QUEUE_P95_MS: u64 = 60_000;

/// Queued-job count above which a critical congestion alert fires.
pub const ALERT_QUEUE_CONGESTION_JOBS: u64 = 20;
