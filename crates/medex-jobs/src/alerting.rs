//! Rule-based alerting over job manager metrics snapshots.
//!
//! Every produced event goes to all sinks. A failing sink is logged and
//! skipped. Critical events also drive the circuit breaker, which is the
//! only automatic path into a restrictive state.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use medex_core::config::env_or;
use medex_core::{defaults, BreakerState, MetricsSnapshot, Result};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::{error, info, warn};

use crate::circuit_breaker::CircuitBreaker;

pub const HIGH_FAILURE_RATE: &str = "HighFailureRate";
pub const HIGH_FALLBACK_RATE: &str = "HighFallbackRate";
pub const SLOW_INFERENCE: &str = "SlowInference";
pub const SLOW_QUEUE: &str = "SlowQueue";
pub const QUEUE_CONGESTION: &str = "QueueCongestion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One threshold breach. Carries metric values only, never PHI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(
        name: &str,
        severity: AlertSeverity,
        message: String,
        metric: &str,
        value: f64,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.to_string(),
            severity,
            message,
            metric: metric.to_string(),
            value,
            threshold,
            timestamp: Utc::now(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == AlertSeverity::Critical
    }
}

// =============================================================================
// RULES
// =============================================================================

/// A single threshold check against one snapshot.
pub trait AlertRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, metrics: &MetricsSnapshot) -> Option<AlertEvent>;
}

/// Failure rate above threshold, once enough jobs have finished.
#[derive(Debug, Clone)]
pub struct HighFailureRateRule {
    pub threshold: f64,
    pub min_volume: u64,
}

impl AlertRule for HighFailureRateRule {
    fn name(&self) -> &'static str {
        HIGH_FAILURE_RATE
    }

    fn evaluate(&self, metrics: &MetricsSnapshot) -> Option<AlertEvent> {
        let attempted = metrics.jobs.completed + metrics.jobs.failed;
        let rate = metrics.rates.fail_rate;
        if attempted < self.min_volume || rate <= self.threshold {
            return None;
        }
        Some(AlertEvent::new(
            HIGH_FAILURE_RATE,
            AlertSeverity::Critical,
            format!(
                "Failure rate {:.1}% exceeds threshold {:.1}%",
                rate * 100.0,
                self.threshold * 100.0
            ),
            "fail_rate",
            rate,
            self.threshold,
        ))
    }
}

/// Fallback rate above threshold, once enough jobs have completed.
#[derive(Debug, Clone)]
pub struct HighFallbackRateRule {
    pub threshold: f64,
    pub min_volume: u64,
}

impl AlertRule for HighFallbackRateRule {
    fn name(&self) -> &'static str {
        HIGH_FALLBACK_RATE
    }

    fn evaluate(&self, metrics: &MetricsSnapshot) -> Option<AlertEvent> {
        let rate = metrics.rates.fallback_rate;
        if metrics.jobs.completed < self.min_volume || rate <= self.threshold {
            return None;
        }
        Some(AlertEvent::new(
            HIGH_FALLBACK_RATE,
            AlertSeverity::Warning,
            format!(
                "Fallback rate {:.1}% exceeds threshold {:.1}%",
                rate * 100.0,
                self.threshold * 100.0
            ),
            "fallback_rate",
            rate,
            self.threshold,
        ))
    }
}

/// Which latency series a [`HighLatencyRule`] watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencySeries {
    Inference,
    Queue,
}

impl LatencySeries {
    fn metric_path(self) -> &'static str {
        match self {
            Self::Inference => "latency_ms.inference.p95",
            Self::Queue => "latency_ms.queue.p95",
        }
    }
}

/// p95 latency above threshold.
#[derive(Debug, Clone)]
pub struct HighLatencyRule {
    pub name: &'static str,
    pub series: LatencySeries,
    pub threshold_ms: u64,
    pub severity: AlertSeverity,
}

impl AlertRule for HighLatencyRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn evaluate(&self, metrics: &MetricsSnapshot) -> Option<AlertEvent> {
        let p95 = match self.series {
            LatencySeries::Inference => metrics.latency_ms.inference.p95,
            LatencySeries::Queue => metrics.latency_ms.queue.p95,
        };
        if p95 <= self.threshold_ms {
            return None;
        }
        Some(AlertEvent::new(
            self.name,
            self.severity,
            format!("{} {}ms exceeds threshold {}ms", self.name, p95, self.threshold_ms),
            self.series.metric_path(),
            p95 as f64,
            self.threshold_ms as f64,
        ))
    }
}

/// Queued job count above threshold.
#[derive(Debug, Clone)]
pub struct QueueCongestionRule {
    pub threshold: u64,
    pub severity: AlertSeverity,
}

impl AlertRule for QueueCongestionRule {
    fn name(&self) -> &'static str {
        QUEUE_CONGESTION
    }

    fn evaluate(&self, metrics: &MetricsSnapshot) -> Option<AlertEvent> {
        let in_queue = metrics.jobs.in_queue;
        if in_queue <= self.threshold {
            return None;
        }
        Some(AlertEvent::new(
            QUEUE_CONGESTION,
            self.severity,
            format!("Queue size {} exceeds threshold {}", in_queue, self.threshold),
            "in_queue",
            in_queue as f64,
            self.threshold as f64,
        ))
    }
}

// =============================================================================
// SINKS
// =============================================================================

/// Destination for alert events.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    fn emit(&self, event: &AlertEvent) -> Result<()>;
}

/// Writes alerts to the structured log at a level matching the severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertSink;

impl AlertSink for LoggingAlertSink {
    fn name(&self) -> &str {
        "logging"
    }

    fn emit(&self, event: &AlertEvent) -> Result<()> {
        match event.severity {
            AlertSeverity::Critical => error!(
                subsystem = "alerts",
                alert_name = %event.name,
                severity = %event.severity,
                metric = %event.metric,
                value = event.value,
                threshold = event.threshold,
                "ALERT: {}",
                event.message
            ),
            AlertSeverity::Warning => warn!(
                subsystem = "alerts",
                alert_name = %event.name,
                severity = %event.severity,
                metric = %event.metric,
                value = event.value,
                threshold = event.threshold,
                "ALERT: {}",
                event.message
            ),
            AlertSeverity::Info => info!(
                subsystem = "alerts",
                alert_name = %event.name,
                severity = %event.severity,
                metric = %event.metric,
                value = event.value,
                threshold = event.threshold,
                "ALERT: {}",
                event.message
            ),
        }
        Ok(())
    }
}

/// Builds a chat-webhook style payload without sending it. Payloads are
/// kept so callers can inspect what would have been sent.
#[derive(Debug, Default)]
pub struct NotificationStubSink {
    channel: String,
    sent: Mutex<Vec<JsonValue>>,
}

impl NotificationStubSink {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn payload(&self, event: &AlertEvent) -> JsonValue {
        let color = match event.severity {
            AlertSeverity::Info => "#36a64f",
            AlertSeverity::Warning => "#ffcc00",
            AlertSeverity::Critical => "#ff0000",
        };
        json!({
            "channel": self.channel,
            "username": "medex alerts",
            "attachments": [{
                "color": color,
                "title": format!("[{}] {}", event.severity.as_str().to_uppercase(), event.name),
                "text": event.message,
                "fields": [
                    {"title": "Metric", "value": event.metric, "short": true},
                    {"title": "Value", "value": event.value.to_string(), "short": true},
                    {"title": "Threshold", "value": event.threshold.to_string(), "short": true},
                ],
                "ts": event.timestamp.timestamp(),
            }],
        })
    }

    pub fn sent(&self) -> Vec<JsonValue> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AlertSink for NotificationStubSink {
    fn name(&self) -> &str {
        "notification_stub"
    }

    fn emit(&self, event: &AlertEvent) -> Result<()> {
        let payload = self.payload(event);
        info!(
            subsystem = "alerts",
            component = "notification_stub",
            alert_name = %event.name,
            channel = %self.channel,
            "Notification payload built (not sent)"
        );
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        Ok(())
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Alert thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfig {
    pub failure_rate_threshold: f64,
    pub fallback_rate_threshold: f64,
    pub min_volume: u64,
    pub inference_p95_ms: u64,
    pub queue_p95_ms: u64,
    pub queue_congestion_jobs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: defaults::ALERT_FAILURE_RATE_THRESHOLD,
            fallback_rate_threshold: defaults::ALERT_FALLBACK_RATE_THRESHOLD,
            min_volume: defaults::ALERT_MIN_VOLUME,
            inference_p95_ms: defaults::ALERT_INFERENCE_P95_MS,
            queue_p95_ms: defaults::ALERT_QUEUE_P95_MS,
            queue_congestion_jobs: defaults::ALERT_QUEUE_CONGESTION_JOBS,
        }
    }
}

impl AlertConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `ALERT_FAILURE_RATE_THRESHOLD` | `0.10` |
    /// | `ALERT_FALLBACK_RATE_THRESHOLD` | `0.20` |
    /// | `ALERT_MIN_VOLUME` | `5` |
    /// | `ALERT_INFERENCE_P95_MS` | `45000` |
    /// | `ALERT_QUEUE_P95_MS` | `60000` |
    /// | `ALERT_QUEUE_CONGESTION_JOBS` | `20` |
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            failure_rate_threshold: env_or("ALERT_FAILURE_RATE_THRESHOLD", d.failure_rate_threshold),
            fallback_rate_threshold: env_or(
                "ALERT_FALLBACK_RATE_THRESHOLD",
                d.fallback_rate_threshold,
            ),
            min_volume: env_or("ALERT_MIN_VOLUME", d.min_volume),
            inference_p95_ms: env_or("ALERT_INFERENCE_P95_MS", d.inference_p95_ms),
            queue_p95_ms: env_or("ALERT_QUEUE_P95_MS", d.queue_p95_ms),
            queue_congestion_jobs: env_or("ALERT_QUEUE_CONGESTION_JOBS", d.queue_congestion_jobs),
        }
    }

    pub fn with_queue_congestion_jobs(mut self, jobs: u64) -> Self {
        self.queue_congestion_jobs = jobs;
        self
    }

    pub fn with_min_volume(mut self, min_volume: u64) -> Self {
        self.min_volume = min_volume;
        self
    }

    /// The fixed, ordered rule list.
    pub fn rules(&self) -> Vec<Box<dyn AlertRule>> {
        vec![
            Box::new(HighFailureRateRule {
                threshold: self.failure_rate_threshold,
                min_volume: self.min_volume,
            }),
            Box::new(HighFallbackRateRule {
                threshold: self.fallback_rate_threshold,
                min_volume: self.min_volume,
            }),
            Box::new(HighLatencyRule {
                name: SLOW_INFERENCE,
                series: LatencySeries::Inference,
                threshold_ms: self.inference_p95_ms,
                severity: AlertSeverity::Warning,
            }),
            Box::new(HighLatencyRule {
                name: SLOW_QUEUE,
                series: LatencySeries::Queue,
                threshold_ms: self.queue_p95_ms,
                severity: AlertSeverity::Warning,
            }),
            Box::new(QueueCongestionRule {
                threshold: self.queue_congestion_jobs,
                severity: AlertSeverity::Critical,
            }),
        ]
    }
}

/// Evaluates rules, dispatches events to sinks, and drives the breaker.
pub struct AlertEngine {
    rules: Vec<Box<dyn AlertRule>>,
    sinks: Vec<Arc<dyn AlertSink>>,
    breaker: Arc<CircuitBreaker>,
}

impl AlertEngine {
    /// Engine with the standard rules and a single logging sink.
    pub fn new(config: &AlertConfig, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            rules: config.rules(),
            sinks: vec![Arc::new(LoggingAlertSink)],
            breaker,
        }
    }

    /// Replace the sink list.
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Evaluate every rule against `metrics`, in order.
    pub fn evaluate(&self, metrics: &MetricsSnapshot) -> Vec<AlertEvent> {
        let events: Vec<AlertEvent> = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(metrics))
            .collect();

        for event in &events {
            if event.is_critical() {
                self.drive_breaker(event);
            }
            self.dispatch(event);
        }
        events
    }

    fn drive_breaker(&self, event: &AlertEvent) {
        let reason = format!("critical alert: {}", event.name);
        match self.breaker.state() {
            BreakerState::Enabled => {
                self.breaker.transition(BreakerState::Degraded, &reason);
            }
            BreakerState::Degraded if event.name == QUEUE_CONGESTION => {
                self.breaker.transition(BreakerState::Disabled, &reason);
            }
            _ => {}
        }
    }

    fn dispatch(&self, event: &AlertEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event) {
                error!(
                    subsystem = "alerts",
                    sink = sink.name(),
                    alert_name = %event.name,
                    error = %e,
                    "Alert sink failed"
                );
            }
        }
    }
}
