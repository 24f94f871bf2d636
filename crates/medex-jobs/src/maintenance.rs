//! Maintenance mode toggle.
//!
//! While enabled, new submissions are rejected. Jobs already queued keep
//! running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Lock-free maintenance flag. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceMode {
    enabled: Arc<AtomicBool>,
}

impl MaintenanceMode {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    /// Hot path, checked on every submission.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            warn!(
                subsystem = "jobs",
                op = "maintenance_toggle",
                enabled,
                "Maintenance mode {}",
                if enabled { "ENABLED" } else { "DISABLED" }
            );
        }
    }
}
