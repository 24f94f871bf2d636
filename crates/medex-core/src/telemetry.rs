//! Tracing-backed telemetry emitter.
//!
//! Events are rate-limited per event name and payloads are stripped of any
//! key that could carry patient data before they reach the log.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info};

use crate::traits::TelemetryEmitter;

/// Payload keys removed at any depth.
pub const PHI_FORBIDDEN_KEYS: &[&str] = &[
    "text",
    "transcript",
    "segments",
    "segment",
    "patient",
    "content",
    "raw",
    "audio",
    "speech",
    "name",
    "diagnosis",
    "condition",
];

/// Remove PHI-bearing keys from a JSON payload, recursively.
pub fn strip_phi(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let cleaned: Map<String, JsonValue> = map
                .into_iter()
                .filter(|(k, _)| !PHI_FORBIDDEN_KEYS.contains(&k.to_ascii_lowercase().as_str()))
                .map(|(k, v)| (k, strip_phi(v)))
                .collect();
            JsonValue::Object(cleaned)
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(strip_phi).collect()),
        other => other,
    }
}

/// Telemetry emitter that writes events as structured log lines.
#[derive(Debug, Default)]
pub struct LogTelemetry {
    last_emitted: Mutex<HashMap<String, Instant>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit unless the same event fired within `cooldown`. Returns whether
    /// the event was written.
    pub fn try_emit(&self, event: &str, payload: JsonValue, cooldown: Duration) -> bool {
        let now = Instant::now();
        {
            let mut last = self
                .last_emitted
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(prev) = last.get(event) {
                if !cooldown.is_zero() && now.duration_since(*prev) < cooldown {
                    debug!(subsystem = "telemetry", event, "Event suppressed by cooldown");
                    return false;
                }
            }
            last.insert(event.to_string(), now);
        }

        let payload = strip_phi(payload);
        info!(subsystem = "telemetry", event, payload = %payload, "Telemetry event");
        true
    }
}

impl TelemetryEmitter for LogTelemetry {
    fn emit(&self, event: &str, payload: JsonValue, cooldown: Duration) {
        self.try_emit(event, payload, cooldown);
    }
}
