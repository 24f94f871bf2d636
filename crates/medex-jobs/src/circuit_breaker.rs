//! Tri-state admission gate with exponential-backoff auto recovery.
//!
//! `Enabled` admits and runs jobs normally, `Degraded` admits jobs but runs
//! them through the cheap stub, `Disabled` rejects new submissions. A manual
//! override always wins and freezes automatic transitions until cleared.
//!
//! The only automatic paths into a restrictive state come from the alert
//! engine via [`CircuitBreaker::transition`]. Recovery is evaluated
//! periodically via [`CircuitBreaker::evaluate_recovery`].

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use medex_core::config::env_or;
use medex_core::{defaults, BreakerState, MetricsSnapshot};
use serde::Serialize;
use tracing::{info, warn};

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Base cooldown before a recovery step, doubled per recovery attempt.
    pub cooldown: Duration,
    /// Failure rate below which `Degraded -> Enabled` is allowed.
    pub recovery_failure_threshold: f64,
    /// Cap on the backoff exponent.
    pub max_backoff_exponent: u32,
    /// Active jobs must be below this for full recovery.
    pub concurrency_limit: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(defaults::CIRCUIT_BREAKER_COOLDOWN_SECS),
            recovery_failure_threshold: defaults::CIRCUIT_BREAKER_RECOVERY_FAILURE_THRESHOLD,
            max_backoff_exponent: defaults::CIRCUIT_BREAKER_MAX_BACKOFF_EXPONENT,
            concurrency_limit: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CIRCUIT_BREAKER_COOLDOWN_SECS` | `300` | Base recovery cooldown |
    /// | `CIRCUIT_BREAKER_RECOVERY_FAILURE_THRESHOLD` | `0.05` | Max failure rate for full recovery |
    pub fn from_env() -> Self {
        Self {
            cooldown: Duration::from_secs(env_or(
                "CIRCUIT_BREAKER_COOLDOWN_SECS",
                defaults::CIRCUIT_BREAKER_COOLDOWN_SECS,
            )),
            recovery_failure_threshold: env_or(
                "CIRCUIT_BREAKER_RECOVERY_FAILURE_THRESHOLD",
                defaults::CIRCUIT_BREAKER_RECOVERY_FAILURE_THRESHOLD,
            ),
            ..Self::default()
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_recovery_failure_threshold(mut self, threshold: f64) -> Self {
        self.recovery_failure_threshold = threshold;
        self
    }

    /// Cooldown for the given attempt count: `base * 2^min(attempts, cap)`.
    pub fn effective_cooldown(&self, recovery_attempts: u32) -> Duration {
        let exponent = recovery_attempts.min(self.max_backoff_exponent);
        self.cooldown.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Clone)]
struct BreakerInner {
    auto_state: BreakerState,
    manual_override: Option<BreakerState>,
    state_entry_at: DateTime<Utc>,
    last_critical_at: Option<DateTime<Utc>>,
    recovery_attempts: u32,
}

impl BreakerInner {
    fn effective(&self) -> BreakerState {
        self.manual_override.unwrap_or(self.auto_state)
    }
}

/// Point-in-time copy of the breaker state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub auto_state: BreakerState,
    pub manual_override: Option<BreakerState>,
    pub state_entry_at: DateTime<Utc>,
    pub last_critical_at: Option<DateTime<Utc>>,
    pub recovery_attempts: u32,
}

/// Process-wide admission gate. Share via `Arc`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::new_at(config, Utc::now())
    }

    /// Create a breaker whose initial state was entered at `now`.
    pub fn new_at(config: CircuitBreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                auto_state: BreakerState::Enabled,
                manual_override: None,
                state_entry_at: now,
                last_critical_at: None,
                recovery_attempts: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Effective state: the manual override if set, else the auto state.
    pub fn state(&self) -> BreakerState {
        self.lock().effective()
    }

    /// State held by the automatic state machine, ignoring any override.
    pub fn auto_state(&self) -> BreakerState {
        self.lock().auto_state
    }

    pub fn manual_override(&self) -> Option<BreakerState> {
        self.lock().manual_override
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.lock().recovery_attempts
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.effective(),
            auto_state: inner.auto_state,
            manual_override: inner.manual_override,
            state_entry_at: inner.state_entry_at,
            last_critical_at: inner.last_critical_at,
            recovery_attempts: inner.recovery_attempts,
        }
    }

    /// Set or clear (`None`) the manual override.
    pub fn set_manual_override(&self, state: Option<BreakerState>) {
        self.set_manual_override_at(state, Utc::now());
    }

    pub fn set_manual_override_at(&self, state: Option<BreakerState>, now: DateTime<Utc>) {
        let mut inner = self.lock();
        let old = inner.effective();
        inner.manual_override = state;
        let new = inner.effective();

        if old != new {
            inner.state_entry_at = now;
            warn!(
                subsystem = "jobs",
                component = "circuit_breaker",
                op = "manual_override",
                old_state = %old,
                new_state = %new,
                "Pipeline state manually changed"
            );
        }
    }

    /// Automatic transition. Returns `false` when ignored because a manual
    /// override is active or the breaker is already in `target`.
    pub fn transition(&self, target: BreakerState, reason: &str) -> bool {
        self.transition_at(target, reason, Utc::now())
    }

    pub fn transition_at(&self, target: BreakerState, reason: &str, now: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        if inner.manual_override.is_some() {
            return false;
        }

        let old = inner.auto_state;
        if old == target {
            return false;
        }

        inner.auto_state = target;
        inner.state_entry_at = now;

        if target.is_restrictive() {
            inner.last_critical_at = Some(now);
            if old == BreakerState::Enabled {
                inner.recovery_attempts = 0;
            } else {
                inner.recovery_attempts += 1;
            }
        }

        warn!(
            subsystem = "jobs",
            component = "circuit_breaker",
            op = "transition",
            old_state = %old,
            new_state = %target,
            reason,
            attempt_count = inner.recovery_attempts,
            "Pipeline state automatically changed"
        );
        true
    }

    /// Periodic recovery check. Returns the new auto state when a recovery
    /// step was taken.
    pub fn evaluate_recovery(&self, metrics: &MetricsSnapshot) -> Option<BreakerState> {
        self.evaluate_recovery_at(metrics, Utc::now())
    }

    pub fn evaluate_recovery_at(
        &self,
        metrics: &MetricsSnapshot,
        now: DateTime<Utc>,
    ) -> Option<BreakerState> {
        let mut inner = self.lock();
        if inner.manual_override.is_some() {
            return None;
        }

        let cooldown = self.config.effective_cooldown(inner.recovery_attempts);

        match inner.auto_state {
            BreakerState::Enabled => None,
            BreakerState::Disabled => {
                let since = inner.last_critical_at.unwrap_or(inner.state_entry_at);
                if !elapsed_exceeds(since, now, cooldown) || metrics.jobs.in_queue > 0 {
                    return None;
                }

                // Attempts stay high until full recovery.
                inner.auto_state = BreakerState::Degraded;
                inner.state_entry_at = now;
                info!(
                    subsystem = "jobs",
                    component = "circuit_breaker",
                    op = "recover",
                    cooldown_secs = cooldown.as_secs(),
                    attempt_count = inner.recovery_attempts,
                    "Auto-recover: disabled -> degraded"
                );
                Some(BreakerState::Degraded)
            }
            BreakerState::Degraded => {
                if !elapsed_exceeds(inner.state_entry_at, now, cooldown)
                    || metrics.rates.fail_rate >= self.config.recovery_failure_threshold
                    || metrics.jobs.active >= self.config.concurrency_limit
                {
                    return None;
                }

                inner.auto_state = BreakerState::Enabled;
                inner.state_entry_at = now;
                inner.recovery_attempts = 0;
                info!(
                    subsystem = "jobs",
                    component = "circuit_breaker",
                    op = "recover",
                    cooldown_secs = cooldown.as_secs(),
                    fail_rate = metrics.rates.fail_rate,
                    "Auto-recover: degraded -> enabled"
                );
                Some(BreakerState::Enabled)
            }
        }
    }
}

/// Strictly more than `cooldown` has passed since `since`.
fn elapsed_exceeds(since: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> bool {
    (now - since).to_std().map_or(false, |elapsed| elapsed > cooldown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use medex_core::{JobCounts, Rates};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn secs(n: i64) -> ChronoDuration {
        ChronoDuration::seconds(n)
    }

    fn idle_metrics() -> MetricsSnapshot {
        MetricsSnapshot::default()
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new_at(CircuitBreakerConfig::default(), t0())
    }

    #[test]
    fn test_starts_enabled() {
        let cb = breaker();
        assert_eq!(cb.state(), BreakerState::Enabled);
        assert_eq!(cb.recovery_attempts(), 0);
        assert!(cb.snapshot().last_critical_at.is_none());
    }

    #[test]
    fn test_effective_cooldown_backoff() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.effective_cooldown(0), Duration::from_secs(300));
        assert_eq!(config.effective_cooldown(3), Duration::from_secs(2400));
        assert_eq!(config.effective_cooldown(10), Duration::from_secs(300 * 1024));
        assert_eq!(config.effective_cooldown(50), Duration::from_secs(300 * 1024));
    }

    #[test]
    fn test_restrictive_transition_records_alert() {
        let cb = breaker();
        assert!(cb.transition_at(BreakerState::Degraded, "test", t0() + secs(5)));
        let snap = cb.snapshot();
        assert_eq!(snap.state, BreakerState::Degraded);
        assert_eq!(snap.last_critical_at, Some(t0() + secs(5)));
        assert_eq!(snap.state_entry_at, t0() + secs(5));
        assert_eq!(snap.recovery_attempts, 0);
    }

    #[test]
    fn test_attempts_increment_only_from_restrictive() {
        let cb = breaker();
        cb.transition_at(BreakerState::Degraded, "a", t0());
        assert_eq!(cb.recovery_attempts(), 0);
        cb.transition_at(BreakerState::Disabled, "b", t0());
        assert_eq!(cb.recovery_attempts(), 1);
        cb.transition_at(BreakerState::Degraded, "c", t0());
        assert_eq!(cb.recovery_attempts(), 2);

        // Back through Enabled resets the sequence.
        cb.transition_at(BreakerState::Enabled, "d", t0());
        cb.transition_at(BreakerState::Degraded, "e", t0());
        assert_eq!(cb.recovery_attempts(), 0);
    }

    #[test]
    fn test_same_state_transition_is_noop() {
        let cb = breaker();
        cb.transition_at(BreakerState::Degraded, "a", t0());
        assert!(!cb.transition_at(BreakerState::Degraded, "a", t0() + secs(10)));
        assert_eq!(cb.snapshot().state_entry_at, t0());
        assert_eq!(cb.recovery_attempts(), 0);
    }

    #[test]
    fn test_override_freezes_and_reveals_auto_state() {
        let cb = breaker();
        cb.set_manual_override_at(Some(BreakerState::Enabled), t0());
        assert!(!cb.transition_at(BreakerState::Degraded, "ignored", t0()));
        assert_eq!(cb.state(), BreakerState::Enabled);
        assert_eq!(cb.auto_state(), BreakerState::Enabled);

        cb.set_manual_override_at(None, t0());
        cb.transition_at(BreakerState::Degraded, "real", t0());
        cb.set_manual_override_at(Some(BreakerState::Disabled), t0());
        assert_eq!(cb.state(), BreakerState::Disabled);
        assert_eq!(cb.auto_state(), BreakerState::Degraded);

        cb.set_manual_override_at(None, t0());
        assert_eq!(cb.state(), BreakerState::Degraded);
    }

    #[test]
    fn test_recovery_noop_when_enabled_or_overridden() {
        let cb = breaker();
        assert_eq!(cb.evaluate_recovery_at(&idle_metrics(), t0() + secs(100_000)), None);

        cb.transition_at(BreakerState::Degraded, "a", t0());
        cb.set_manual_override_at(Some(BreakerState::Degraded), t0());
        assert_eq!(cb.evaluate_recovery_at(&idle_metrics(), t0() + secs(100_000)), None);
        assert_eq!(cb.auto_state(), BreakerState::Degraded);
    }

    #[test]
    fn test_disabled_recovery_waits_for_empty_queue() {
        let cb = breaker();
        cb.transition_at(BreakerState::Degraded, "a", t0());
        cb.transition_at(BreakerState::Disabled, "b", t0());

        let busy = MetricsSnapshot {
            jobs: JobCounts {
                in_queue: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        // attempts = 1, so the cooldown is 600s
        assert_eq!(cb.evaluate_recovery_at(&busy, t0() + secs(601)), None);
        assert_eq!(cb.evaluate_recovery_at(&idle_metrics(), t0() + secs(600)), None);
        assert_eq!(
            cb.evaluate_recovery_at(&idle_metrics(), t0() + secs(601)),
            Some(BreakerState::Degraded)
        );
        assert_eq!(cb.recovery_attempts(), 1);
    }

    #[test]
    fn test_degraded_recovery_requires_healthy_metrics() {
        let cb = breaker();
        cb.transition_at(BreakerState::Degraded, "a", t0());

        let failing = MetricsSnapshot {
            rates: Rates {
                fail_rate: 0.05,
                fallback_rate: 0.0,
            },
            ..Default::default()
        };
        let busy = MetricsSnapshot {
            jobs: JobCounts {
                active: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let later = t0() + secs(301);
        assert_eq!(cb.evaluate_recovery_at(&failing, later), None);
        assert_eq!(cb.evaluate_recovery_at(&busy, later), None);
        assert_eq!(cb.evaluate_recovery_at(&idle_metrics(), t0() + secs(300)), None);
        assert_eq!(
            cb.evaluate_recovery_at(&idle_metrics(), later),
            Some(BreakerState::Enabled)
        );
        assert_eq!(cb.recovery_attempts(), 0);
    }

    #[test]
    fn test_disabled_backoff_after_three_attempts() {
        let cb = breaker();
        cb.transition_at(BreakerState::Degraded, "a", t0()); // 0
        cb.transition_at(BreakerState::Disabled, "b", t0()); // 1
        cb.transition_at(BreakerState::Degraded, "c", t0()); // 2
        cb.transition_at(BreakerState::Disabled, "d", t0()); // 3
        assert_eq!(cb.recovery_attempts(), 3);

        for elapsed in [300, 600, 1200, 2399, 2400] {
            assert_eq!(
                cb.evaluate_recovery_at(&idle_metrics(), t0() + secs(elapsed)),
                None,
                "recovered too early at {}s",
                elapsed
            );
        }
        assert_eq!(
            cb.evaluate_recovery_at(&idle_metrics(), t0() + secs(2401)),
            Some(BreakerState::Degraded)
        );
    }

    #[test]
    fn test_manual_override_change_resets_entry_time() {
        let cb = breaker();
        cb.set_manual_override_at(Some(BreakerState::Degraded), t0() + secs(42));
        assert_eq!(cb.snapshot().state_entry_at, t0() + secs(42));

        // Same effective state, entry time untouched.
        cb.set_manual_override_at(Some(BreakerState::Degraded), t0() + secs(99));
        assert_eq!(cb.snapshot().state_entry_at, t0() + secs(42));
    }

    #[test]
    fn test_config_builders() {
        let config = CircuitBreakerConfig::default()
            .with_cooldown(Duration::from_secs(10))
            .with_recovery_failure_threshold(0.2);
        assert_eq!(config.cooldown, Duration::from_secs(10));
        assert_eq!(config.recovery_failure_threshold, 0.2);
        assert_eq!(config.effective_cooldown(2), Duration::from_secs(40));
    }
}
