//! Transcript chunking for the map stage.
//!
//! Segments are accumulated greedily; a chunk closes before the segment
//! that would push it over one of the configured limits. Segment boundaries
//! are never split, so an oversized segment becomes a chunk of its own.
//!
//! # Limits
//!
//! | Limit | Closes chunk when | Requires |
//! |-------|-------------------|----------|
//! | `max_duration_ms` | projected span > limit | chunk non-empty |
//! | `hard_token_limit` | projected tokens > limit | `min_segments_per_chunk` segments |
//! | `soft_duration_limit_ms` | projected span > limit | `min_segments_per_chunk` segments |
//!
//! # Example
//!
//! ```rust,ignore
//! use medex_pipeline::chunking::{chunk_transcript, ChunkingConfig};
//!
//! let chunks = chunk_transcript(&transcript, &ChunkingConfig::default());
//! assert!(!chunks.is_empty());
//! ```

use medex_core::config::{env_optional_limit, env_or};
use medex_core::defaults;
use medex_core::{Transcript, TranscriptSegment};
use serde::Serialize;

/// Configuration for transcript chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Hard cap on chunk span in milliseconds.
    pub max_duration_ms: u64,
    /// Hard cap on estimated tokens per chunk (`None` disables).
    pub hard_token_limit: Option<usize>,
    /// Soft cap on chunk span in milliseconds (`None` disables).
    pub soft_duration_limit_ms: Option<u64>,
    /// Segments a chunk must hold before the token or soft limit may close it.
    pub min_segments_per_chunk: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: defaults::CHUNK_MAX_DURATION_MS,
            hard_token_limit: Some(defaults::CHUNK_HARD_TOKEN_LIMIT),
            soft_duration_limit_ms: Some(defaults::CHUNK_SOFT_DURATION_MS),
            min_segments_per_chunk: defaults::CHUNK_MIN_SEGMENTS,
        }
    }
}

impl ChunkingConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CHUNK_MAX_DURATION_MS` | `300000` | Hard span limit |
    /// | `CHUNK_HARD_TOKEN_LIMIT` | `2048` | Token limit, `0` disables |
    /// | `CHUNK_SOFT_DURATION_MS` | `180000` | Soft span limit, `0` disables |
    /// | `CHUNK_MIN_SEGMENTS` | `1` | Minimum segments before token/soft split |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_duration_ms: env_or("CHUNK_MAX_DURATION_MS", defaults.max_duration_ms).max(1),
            hard_token_limit: env_optional_limit("CHUNK_HARD_TOKEN_LIMIT", defaults.hard_token_limit),
            soft_duration_limit_ms: env_optional_limit(
                "CHUNK_SOFT_DURATION_MS",
                defaults.soft_duration_limit_ms,
            ),
            min_segments_per_chunk: env_or("CHUNK_MIN_SEGMENTS", defaults.min_segments_per_chunk)
                .max(1),
        }
    }

    /// Duration-only chunking: no token or soft limit.
    pub fn duration_only(max_duration_ms: u64) -> Self {
        Self {
            max_duration_ms,
            hard_token_limit: None,
            soft_duration_limit_ms: None,
            min_segments_per_chunk: 1,
        }
    }

    pub fn with_max_duration_ms(mut self, ms: u64) -> Self {
        self.max_duration_ms = ms;
        self
    }

    pub fn with_hard_token_limit(mut self, limit: Option<usize>) -> Self {
        self.hard_token_limit = limit;
        self
    }

    pub fn with_soft_duration_limit_ms(mut self, ms: Option<u64>) -> Self {
        self.soft_duration_limit_ms = ms;
        self
    }

    pub fn with_min_segments_per_chunk(mut self, min: usize) -> Self {
        self.min_segments_per_chunk = min.max(1);
        self
    }
}

/// Estimate tokens for a text: `ceil(chars / 4)`, at least 1 when non-empty.
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    if chars == 0 {
        return 0;
    }
    chars.div_ceil(defaults::CHARS_PER_TOKEN).max(1)
}

/// Estimate tokens for a segment, including the speaker label.
pub fn estimate_segment_tokens(segment: &TranscriptSegment) -> usize {
    estimate_tokens(&segment.text) + defaults::SPEAKER_TOKEN_OVERHEAD
}

/// Split a transcript into boundary-respecting chunks.
///
/// Returns the input unchanged as a single chunk when it has at most one
/// segment or already satisfies every limit. Never returns an empty list.
pub fn chunk_transcript(transcript: &Transcript, config: &ChunkingConfig) -> Vec<Transcript> {
    if transcript.segments.len() <= 1 {
        return vec![transcript.clone()];
    }

    let segment_tokens: Vec<usize> = transcript
        .segments
        .iter()
        .map(estimate_segment_tokens)
        .collect();
    let total_tokens: usize = segment_tokens.iter().sum();
    let total_span = transcript.span_ms();

    let fits_tokens = config.hard_token_limit.map_or(true, |l| total_tokens <= l);
    let fits_hard = total_span <= config.max_duration_ms;
    let fits_soft = config.soft_duration_limit_ms.map_or(true, |l| total_span <= l);
    if fits_tokens && fits_hard && fits_soft {
        return vec![transcript.clone()];
    }

    let mut chunks = Vec::new();
    let mut current: Vec<TranscriptSegment> = Vec::new();
    let mut current_tokens = 0usize;

    for (segment, &tokens) in transcript.segments.iter().zip(&segment_tokens) {
        if let Some(first) = current.first() {
            let projected_span = segment.end_ms.saturating_sub(first.start_ms);
            let has_min = current.len() >= config.min_segments_per_chunk;

            let over_hard = projected_span > config.max_duration_ms;
            let over_tokens = config
                .hard_token_limit
                .is_some_and(|l| current_tokens + tokens > l);
            let over_soft = config
                .soft_duration_limit_ms
                .is_some_and(|l| projected_span > l);

            if over_hard || (has_min && (over_tokens || over_soft)) {
                chunks.push(Transcript::from_segments(
                    std::mem::take(&mut current),
                    transcript.language.clone(),
                ));
                current_tokens = 0;
            }
        }

        current.push(segment.clone());
        current_tokens += tokens;
    }

    if !current.is_empty() {
        chunks.push(Transcript::from_segments(current, transcript.language.clone()));
    }

    chunks
}

/// Per-chunk statistics. Counts only, never content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkSummary {
    pub index: usize,
    pub segment_count: usize,
    pub token_estimate: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    pub chunk_count: usize,
    pub total_segments: usize,
    pub total_tokens_estimated: usize,
    pub total_duration_ms: u64,
    pub chunks: Vec<ChunkSummary>,
}

/// Summarize a chunking result.
pub fn chunk_stats(chunks: &[Transcript]) -> ChunkStats {
    let summaries: Vec<ChunkSummary> = chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| ChunkSummary {
            index,
            segment_count: chunk.segments.len(),
            token_estimate: chunk.segments.iter().map(estimate_segment_tokens).sum(),
            duration_ms: chunk.span_ms(),
        })
        .collect();

    ChunkStats {
        chunk_count: summaries.len(),
        total_segments: summaries.iter().map(|c| c.segment_count).sum(),
        total_tokens_estimated: summaries.iter().map(|c| c.token_estimate).sum(),
        total_duration_ms: summaries.iter().map(|c| c.duration_ms).sum(),
        chunks: summaries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medex_core::Speaker;

    fn seg(text: &str, start_ms: u64, end_ms: u64) -> TranscriptSegment {
        TranscriptSegment::new(Speaker::Patient, text, start_ms, end_ms)
    }

    /// `n` back-to-back segments of `len_ms` each.
    fn uniform(n: usize, len_ms: u64) -> Transcript {
        let segments = (0..n)
            .map(|i| seg(&format!("s{}", i), i as u64 * len_ms, (i as u64 + 1) * len_ms))
            .collect();
        Transcript::from_segments(segments, "es")
    }

    fn flatten(chunks: &[Transcript]) -> Vec<TranscriptSegment> {
        chunks.iter().flat_map(|c| c.segments.clone()).collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("oído"), 1);
    }

    #[test]
    fn test_estimate_segment_tokens_includes_speaker() {
        assert_eq!(estimate_segment_tokens(&seg("abcdefgh", 0, 1)), 4);
        assert_eq!(estimate_segment_tokens(&seg("", 0, 1)), 2);
    }

    #[test]
    fn test_empty_transcript_single_chunk() {
        let t = Transcript::from_segments(vec![], "es");
        let chunks = chunk_transcript(&t, &ChunkingConfig::default());
        assert_eq!(chunks, vec![t]);
    }

    #[test]
    fn test_fits_returns_unchanged() {
        let t = uniform(5, 1000);
        let chunks = chunk_transcript(&t, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], t);
    }

    #[test]
    fn test_duration_split() {
        let t = uniform(10, 60_000);
        let chunks = chunk_transcript(&t, &ChunkingConfig::duration_only(300_000));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].segments.len(), 5);
        assert_eq!(chunks[0].duration_ms, 300_000);
        assert_eq!(flatten(&chunks), t.segments);
    }

    #[test]
    fn test_every_chunk_within_limit() {
        let t = uniform(37, 45_000);
        let config = ChunkingConfig::duration_only(200_000);
        let chunks = chunk_transcript(&t, &config);
        for chunk in &chunks {
            assert!(chunk.span_ms() <= config.max_duration_ms);
        }
        assert_eq!(flatten(&chunks), t.segments);
    }

    #[test]
    fn test_oversized_segment_alone() {
        let t = Transcript::from_segments(
            vec![seg("a", 0, 1000), seg("b", 1000, 900_000), seg("c", 900_000, 901_000)],
            "es",
        );
        let chunks = chunk_transcript(&t, &ChunkingConfig::duration_only(300_000));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].segments.len(), 1);
        assert_eq!(chunks[1].segments[0].text, "b");
    }

    #[test]
    fn test_single_oversized_segment_unchanged() {
        let t = Transcript::from_segments(vec![seg("a", 0, 1_000_000)], "es");
        let chunks = chunk_transcript(&t, &ChunkingConfig::duration_only(1000));
        assert_eq!(chunks, vec![t]);
    }

    #[test]
    fn test_token_limit_split() {
        let text = "x".repeat(40); // 10 + 2 tokens
        let segments = (0..6).map(|i| seg(&text, i * 10, i * 10 + 10)).collect();
        let t = Transcript::from_segments(segments, "es");
        let config = ChunkingConfig::duration_only(u64::MAX).with_hard_token_limit(Some(24));
        let chunks = chunk_transcript(&t, &config);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.segments.len() == 2));
    }

    #[test]
    fn test_soft_limit_split() {
        let t = uniform(6, 60_000);
        let config = ChunkingConfig::duration_only(u64::MAX).with_soft_duration_limit_ms(Some(120_000));
        let chunks = chunk_transcript(&t, &config);
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn test_min_segments_defers_soft_split() {
        let t = uniform(6, 60_000);
        let config = ChunkingConfig::duration_only(u64::MAX)
            .with_soft_duration_limit_ms(Some(60_000))
            .with_min_segments_per_chunk(3);
        let chunks = chunk_transcript(&t, &config);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.segments.len() == 3));
    }

    #[test]
    fn test_min_segments_does_not_override_hard_duration() {
        let t = uniform(4, 100_000);
        let config = ChunkingConfig::duration_only(150_000).with_min_segments_per_chunk(3);
        let chunks = chunk_transcript(&t, &config);
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_language_preserved() {
        let mut t = uniform(10, 60_000);
        t.language = "en".into();
        let chunks = chunk_transcript(&t, &ChunkingConfig::duration_only(120_000));
        assert!(chunks.iter().all(|c| c.language == "en"));
    }

    #[test]
    fn test_chunk_stats() {
        let t = uniform(10, 60_000);
        let chunks = chunk_transcript(&t, &ChunkingConfig::duration_only(300_000));
        let stats = chunk_stats(&chunks);
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.total_segments, 10);
        assert_eq!(stats.chunks[1].index, 1);
        assert_eq!(stats.total_duration_ms, 600_000);
    }

    #[test]
    fn test_chunk_stats_empty() {
        assert_eq!(chunk_stats(&[]), ChunkStats::default());
    }

    #[test]
    fn test_config_default() {
        let config = ChunkingConfig::default();
        assert_eq!(config.max_duration_ms, 300_000);
        assert_eq!(config.hard_token_limit, Some(2048));
        assert_eq!(config.soft_duration_limit_ms, Some(180_000));
        assert_eq!(config.min_segments_per_chunk, 1);
    }
}
