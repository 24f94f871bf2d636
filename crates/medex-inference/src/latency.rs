//! Latency statistics for job and pipeline durations.
//!
//! [`SampleWindow`] keeps the most recent N samples; [`LatencyStats`]
//! summarizes a sample set into percentiles.

use std::collections::VecDeque;

use medex_core::Percentiles;
use serde::{Deserialize, Serialize};

/// Latency statistics for a set of samples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Median latency (P50) in milliseconds.
    pub p50_ms: u64,
    /// 95th percentile latency in milliseconds.
    pub p95_ms: u64,
    /// Maximum observed latency in milliseconds.
    pub max_ms: u64,
    /// Number of samples.
    pub samples: usize,
}

impl LatencyStats {
    /// Create stats from an unsorted list of latencies.
    pub fn from_samples(mut latencies: Vec<u64>) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }

        latencies.sort_unstable();
        let n = latencies.len();

        let p50_idx = n / 2;
        let p95_idx = (n as f64 * 0.95) as usize;

        Self {
            p50_ms: latencies[p50_idx.min(n - 1)],
            p95_ms: latencies[p95_idx.min(n - 1)],
            max_ms: latencies[n - 1],
            samples: n,
        }
    }

    pub fn percentiles(&self) -> Percentiles {
        Percentiles {
            p50: self.p50_ms,
            p95: self.p95_ms,
        }
    }
}

/// Bounded window of the most recent samples.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl SampleWindow {
    /// Create a window keeping at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sample, evicting the oldest when full.
    pub fn record(&mut self, value_ms: u64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value_ms);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Arithmetic mean of the window, `None` when empty.
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    pub fn stats(&self) -> LatencyStats {
        LatencyStats::from_samples(self.samples.iter().copied().collect())
    }
}
