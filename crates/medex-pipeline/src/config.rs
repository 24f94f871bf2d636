//! Pipeline orchestrator configuration.

use std::time::Duration;

use medex_core::config::{env_flag, env_or};
use medex_core::{defaults, DriftGuardMode};

use crate::chunking::ChunkingConfig;

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Deadline for the whole staged run.
    pub pipeline_timeout: Duration,
    /// Deadline for each per-chunk extraction.
    pub chunk_timeout: Duration,
    /// Deadline for the refinement call.
    pub refine_timeout: Duration,
    /// Deadline for the single-shot fallback extraction.
    pub fallback_timeout: Duration,
    pub drift_mode: DriftGuardMode,
    /// Minimum gap between repeated drift telemetry events.
    pub drift_cooldown: Duration,
    pub chunking: ChunkingConfig,
    /// Return sanitized per-chunk evidence in the metrics.
    pub include_evidence: bool,
    pub max_evidence_per_chunk: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline_timeout: Duration::from_secs(defaults::PIPELINE_TIMEOUT_SECS),
            chunk_timeout: Duration::from_secs(defaults::PIPELINE_CHUNK_TIMEOUT_SECS),
            refine_timeout: Duration::from_secs(defaults::PIPELINE_REFINE_TIMEOUT_SECS),
            fallback_timeout: Duration::from_secs(defaults::PIPELINE_FALLBACK_TIMEOUT_SECS),
            drift_mode: DriftGuardMode::default(),
            drift_cooldown: Duration::from_secs(defaults::DRIFT_GUARD_COOLDOWN_SECS),
            chunking: ChunkingConfig::default(),
            include_evidence: false,
            max_evidence_per_chunk: defaults::EVIDENCE_MAX_SNIPPETS_PER_CHUNK,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PIPELINE_TIMEOUT_SECS` | `120` | Global staged-run deadline |
    /// | `PIPELINE_CHUNK_TIMEOUT_SECS` | `60` | Per-chunk deadline |
    /// | `PIPELINE_REFINE_TIMEOUT_SECS` | `45` | Refinement deadline |
    /// | `PIPELINE_FALLBACK_TIMEOUT_SECS` | `120` | Fallback deadline |
    /// | `DRIFT_GUARD_MODE` | `warn` | `off`, `warn`, or `safe` |
    /// | `DRIFT_GUARD_COOLDOWN_SECS` | `3600` | Drift telemetry cooldown |
    /// | `PIPELINE_INCLUDE_EVIDENCE` | `false` | Return evidence in metrics |
    /// | `EVIDENCE_MAX_SNIPPETS_PER_CHUNK` | `5` | Evidence cap per chunk |
    ///
    /// Chunking limits come from [`ChunkingConfig::from_env`].
    pub fn from_env() -> Self {
        let secs = |key: &str, default: u64| Duration::from_secs(env_or(key, default).max(1));

        Self {
            pipeline_timeout: secs("PIPELINE_TIMEOUT_SECS", defaults::PIPELINE_TIMEOUT_SECS),
            chunk_timeout: secs("PIPELINE_CHUNK_TIMEOUT_SECS", defaults::PIPELINE_CHUNK_TIMEOUT_SECS),
            refine_timeout: secs("PIPELINE_REFINE_TIMEOUT_SECS", defaults::PIPELINE_REFINE_TIMEOUT_SECS),
            fallback_timeout: secs(
                "PIPELINE_FALLBACK_TIMEOUT_SECS",
                defaults::PIPELINE_FALLBACK_TIMEOUT_SECS,
            ),
            drift_mode: env_or("DRIFT_GUARD_MODE", DriftGuardMode::default()),
            drift_cooldown: Duration::from_secs(env_or(
                "DRIFT_GUARD_COOLDOWN_SECS",
                defaults::DRIFT_GUARD_COOLDOWN_SECS,
            )),
            chunking: ChunkingConfig::from_env(),
            include_evidence: env_flag("PIPELINE_INCLUDE_EVIDENCE", false),
            max_evidence_per_chunk: env_or(
                "EVIDENCE_MAX_SNIPPETS_PER_CHUNK",
                defaults::EVIDENCE_MAX_SNIPPETS_PER_CHUNK,
            ),
        }
    }

    pub fn with_pipeline_timeout(mut self, timeout: Duration) -> Self {
        self.pipeline_timeout = timeout;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn with_refine_timeout(mut self, timeout: Duration) -> Self {
        self.refine_timeout = timeout;
        self
    }

    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    pub fn with_drift_mode(mut self, mode: DriftGuardMode) -> Self {
        self.drift_mode = mode;
        self
    }

    pub fn with_drift_cooldown(mut self, cooldown: Duration) -> Self {
        self.drift_cooldown = cooldown;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_include_evidence(mut self, include: bool) -> Self {
        self.include_evidence = include;
        self
    }
}
