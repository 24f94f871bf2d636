//! In-memory FIFO job manager with per-user admission control.
//!
//! Job bodies live in a lookup map; the queue holds ids only. All state is
//! guarded by a single mutex and every read-modify-write sequence happens
//! inside one critical section. The circuit breaker is consulted through
//! its own methods and never locked together with the manager state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use medex_core::config::env_or;
use medex_core::{
    defaults, BreakerState, Error, ExtractRequest, Job, JobCounts, JobStatus, JobStatusView,
    LatencySnapshot, MetricsSnapshot, Rates, Result,
};
use medex_inference::SampleWindow;

use crate::circuit_breaker::CircuitBreaker;
use crate::handler::JobResult;
use crate::maintenance::MaintenanceMode;

/// Configuration for the job manager.
#[derive(Debug, Clone, PartialEq)]
pub struct JobManagerConfig {
    /// Submissions allowed per user per UTC calendar day.
    pub daily_quota: u32,
    /// Jobs are dropped this long after creation, whatever their status.
    pub ttl: Duration,
    /// Number of recent inference durations averaged for the ETA.
    pub eta_window: usize,
    /// Per-job ETA when no inference has been observed yet.
    pub default_eta_secs: u64,
    /// Samples kept for latency percentiles.
    pub latency_samples: usize,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            daily_quota: defaults::JOB_DAILY_QUOTA,
            ttl: Duration::from_secs(defaults::JOB_TTL_SECS),
            eta_window: defaults::JOB_ETA_WINDOW,
            default_eta_secs: defaults::JOB_DEFAULT_ETA_SECS,
            latency_samples: defaults::JOB_LATENCY_SAMPLES,
        }
    }
}

impl JobManagerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_DAILY_QUOTA` | `10` | Submissions per user per day |
    /// | `JOB_TTL_SECS` | `1800` | Job retention from creation |
    /// | `JOB_ETA_WINDOW` | `10` | Jobs averaged for the ETA |
    pub fn from_env() -> Self {
        Self {
            daily_quota: env_or("JOB_DAILY_QUOTA", defaults::JOB_DAILY_QUOTA),
            ttl: Duration::from_secs(env_or("JOB_TTL_SECS", defaults::JOB_TTL_SECS)),
            eta_window: env_or("JOB_ETA_WINDOW", defaults::JOB_ETA_WINDOW).max(1),
            ..Self::default()
        }
    }

    pub fn with_daily_quota(mut self, quota: u32) -> Self {
        self.daily_quota = quota;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_eta_window(mut self, window: usize) -> Self {
        self.eta_window = window;
        self
    }
}

struct ManagerState {
    jobs: HashMap<Uuid, Job>,
    queue: VecDeque<Uuid>,
    active_job: Option<Uuid>,
    /// user id -> queued or running job
    user_active: HashMap<String, Uuid>,
    /// Never purged by the TTL sweep.
    daily_counts: HashMap<(String, NaiveDate), u32>,
    recent_inference_ms: SampleWindow,
    inference_ms: SampleWindow,
    queue_ms: SampleWindow,
    completed: u64,
    failed: u64,
    fallbacks: u64,
}

impl ManagerState {
    fn new(config: &JobManagerConfig) -> Self {
        Self {
            jobs: HashMap::new(),
            queue: VecDeque::new(),
            active_job: None,
            user_active: HashMap::new(),
            daily_counts: HashMap::new(),
            recent_inference_ms: SampleWindow::new(config.eta_window),
            inference_ms: SampleWindow::new(config.latency_samples),
            queue_ms: SampleWindow::new(config.latency_samples),
            completed: 0,
            failed: 0,
            fallbacks: 0,
        }
    }

    /// Queued jobs ordered by creation time, FIFO on ties.
    fn queued_ids(&self) -> Vec<Uuid> {
        let mut queued: Vec<&Job> = self
            .queue
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter(|job| job.status == JobStatus::Queued)
            .collect();
        queued.sort_by_key(|job| job.created_at);
        queued.into_iter().map(|job| job.id).collect()
    }
}

/// Single-instance job manager. Share via `Arc`.
pub struct JobManager {
    config: JobManagerConfig,
    state: Mutex<ManagerState>,
    breaker: Arc<CircuitBreaker>,
    maintenance: MaintenanceMode,
    job_available: Notify,
}

impl JobManager {
    pub fn new(config: JobManagerConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let state = ManagerState::new(&config);
        Self {
            config,
            state: Mutex::new(state),
            breaker,
            maintenance: MaintenanceMode::default(),
            job_available: Notify::new(),
        }
    }

    /// Share an externally owned maintenance flag.
    pub fn with_maintenance(mut self, maintenance: MaintenanceMode) -> Self {
        self.maintenance = maintenance;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &JobManagerConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn maintenance(&self) -> &MaintenanceMode {
        &self.maintenance
    }

    pub fn set_maintenance_mode(&self, enabled: bool) {
        self.maintenance.set(enabled);
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Admit and enqueue a job for `user_id`.
    pub fn submit(&self, user_id: &str, request: ExtractRequest) -> Result<Uuid> {
        self.submit_at(user_id, request, Utc::now())
    }

    /// Admission order: maintenance, breaker (after a recovery check),
    /// per-user exclusivity, daily quota.
    pub fn submit_at(&self, user_id: &str, request: ExtractRequest, now: DateTime<Utc>) -> Result<Uuid> {
        if self.maintenance.is_enabled() {
            return Err(Error::Maintenance("service is under maintenance".to_string()));
        }

        self.breaker
            .evaluate_recovery_at(&self.observability_metrics_at(now), now);
        if self.breaker.state() == BreakerState::Disabled {
            return Err(Error::CircuitDisabled("service is disabled".to_string()));
        }

        let mut state = self.lock();

        if let Some(existing) = state.user_active.get(user_id).copied() {
            let still_active = state
                .jobs
                .get(&existing)
                .is_some_and(|job| job.status.is_active());
            if still_active {
                return Err(Error::Conflict(format!(
                    "user already has a job in progress: {}",
                    existing
                )));
            }
            state.user_active.remove(user_id);
        }

        let key = (user_id.to_string(), now.date_naive());
        let used = state.daily_counts.get(&key).copied().unwrap_or(0);
        if used >= self.config.daily_quota {
            return Err(Error::QuotaExceeded(format!(
                "daily limit of {} reached",
                self.config.daily_quota
            )));
        }

        let job = Job::new(user_id, request, now);
        let job_id = job.id;
        state.jobs.insert(job_id, job);
        state.queue.push_back(job_id);
        state.user_active.insert(user_id.to_string(), job_id);
        state.daily_counts.insert(key, used + 1);
        let queue_size = state.queue.len();
        drop(state);

        self.job_available.notify_one();
        info!(
            subsystem = "jobs",
            component = "manager",
            op = "submit",
            %job_id,
            queue_size,
            "Job submitted"
        );
        Ok(job_id)
    }

    /// Submissions counted for `user_id` on the UTC date of `now`.
    pub fn daily_count_at(&self, user_id: &str, now: DateTime<Utc>) -> u32 {
        self.lock()
            .daily_counts
            .get(&(user_id.to_string(), now.date_naive()))
            .copied()
            .unwrap_or(0)
    }

    // =========================================================================
    // LOOKUPS
    // =========================================================================

    pub fn get_job(&self, job_id: Uuid) -> Option<Job> {
        self.lock().jobs.get(&job_id).cloned()
    }

    /// 1-based position among queued jobs, `None` unless queued.
    pub fn queue_position(&self, job_id: Uuid) -> Option<usize> {
        let state = self.lock();
        Self::position_in(&state, job_id)
    }

    fn position_in(state: &ManagerState, job_id: Uuid) -> Option<usize> {
        match state.jobs.get(&job_id) {
            Some(job) if job.status == JobStatus::Queued => state
                .queued_ids()
                .iter()
                .position(|id| *id == job_id)
                .map(|i| i + 1),
            _ => None,
        }
    }

    /// `position * average recent inference time`, 30s per job without history.
    pub fn eta_seconds(&self, position: usize) -> u64 {
        let state = self.lock();
        self.eta_in(&state, position)
    }

    fn eta_in(&self, state: &ManagerState, position: usize) -> u64 {
        let avg_secs = state
            .recent_inference_ms
            .average()
            .map(|ms| ms / 1000.0)
            .unwrap_or(self.config.default_eta_secs as f64);
        (position as f64 * avg_secs) as u64
    }

    /// Status view for `job_id`, `None` when unknown or expired.
    pub fn status(&self, job_id: Uuid) -> Option<JobStatusView> {
        let state = self.lock();
        let job = state.jobs.get(&job_id)?;
        let position = Self::position_in(&state, job_id);

        Some(JobStatusView {
            job_id,
            status: job.status,
            position,
            eta_seconds: position.map(|p| self.eta_in(&state, p)),
            fallback_used: job.fallback_used,
            contract_warnings: job.contract_warnings.clone(),
            result: job.result.clone(),
            error: job.error.clone(),
        })
    }

    /// Status view that treats another user's job as not found.
    pub fn status_for_user(&self, job_id: Uuid, user_id: &str) -> Result<JobStatusView> {
        let owned = self
            .get_job(job_id)
            .is_some_and(|job| job.user_id == user_id);
        if !owned {
            return Err(Error::NotFound(format!("job {}", job_id)));
        }
        self.status(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    // =========================================================================
    // WORKER SIDE
    // =========================================================================

    /// Wait until a submission signals new work. A signal sent while nobody
    /// waits is kept for the next caller.
    pub async fn job_available(&self) {
        self.job_available.notified().await;
    }

    /// Dequeue the oldest queued job and mark it running.
    pub fn claim_next(&self) -> Option<Job> {
        self.claim_next_at(Utc::now())
    }

    pub fn claim_next_at(&self, now: DateTime<Utc>) -> Option<Job> {
        let mut state = self.lock();
        let next = state.queued_ids().first().copied()?;
        state.queue.retain(|id| *id != next);

        let job = state.jobs.get_mut(&next)?;
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        let queue_ms = (now - job.created_at).num_milliseconds().max(0) as u64;
        let claimed = job.clone();

        state.queue_ms.record(queue_ms);
        state.active_job = Some(next);
        debug!(subsystem = "jobs", job_id = %next, queue_ms, "Job claimed");
        Some(claimed)
    }

    /// Record the outcome of a running job, release the user's slot, and
    /// sweep expired jobs.
    pub fn complete_job(&self, job_id: Uuid, result: JobResult) {
        self.complete_job_at(job_id, result, Utc::now());
    }

    /// Counters, latency samples, and the user slot are updated even when
    /// the job record itself was swept while running.
    pub fn complete_job_at(&self, job_id: Uuid, result: JobResult, now: DateTime<Utc>) {
        let mut state = self.lock();
        if state.active_job == Some(job_id) {
            state.active_job = None;
        }

        match &result {
            JobResult::Success(output) => {
                state.completed += 1;
                if output.fallback_used {
                    state.fallbacks += 1;
                }
                state.inference_ms.record(output.inference_ms);
                state.recent_inference_ms.record(output.inference_ms);
                info!(
                    subsystem = "jobs",
                    component = "manager",
                    op = "complete",
                    %job_id,
                    fallback_used = output.fallback_used,
                    inference_ms = output.inference_ms,
                    "Job finished"
                );
            }
            JobResult::Failed(_) => {
                state.failed += 1;
                warn!(
                    subsystem = "jobs",
                    component = "manager",
                    op = "complete",
                    %job_id,
                    error_code = "JOB_FAILED",
                    "Job failed"
                );
            }
        }

        match state.jobs.get_mut(&job_id) {
            Some(job) => {
                job.completed_at = Some(now);
                match result {
                    JobResult::Success(output) => {
                        job.status = JobStatus::Done;
                        job.result = Some(output.result);
                        job.fallback_used = output.fallback_used;
                        job.contract_warnings = output.contract_warnings;
                    }
                    JobResult::Failed(error) => {
                        job.status = JobStatus::Failed;
                        job.error = Some(error);
                    }
                }
            }
            None => warn!(subsystem = "jobs", %job_id, "Finished job expired before completion"),
        }

        state.user_active.retain(|_, active| *active != job_id);
        drop(state);

        self.sweep_expired_at(now);
    }

    /// Drop jobs older than the TTL. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.ttl;
        let mut state = self.lock();
        let expired: Vec<Uuid> = state
            .jobs
            .values()
            .filter(|job| (now - job.created_at).to_std().is_ok_and(|age| age > ttl))
            .map(|job| job.id)
            .collect();

        for id in &expired {
            state.jobs.remove(id);
        }
        if !expired.is_empty() {
            let jobs = &state.jobs;
            let kept: VecDeque<Uuid> = state
                .queue
                .iter()
                .copied()
                .filter(|id| jobs.contains_key(id))
                .collect();
            state.queue = kept;
            debug!(subsystem = "jobs", removed = expired.len(), "Expired jobs swept");
        }
        expired.len()
    }

    // =========================================================================
    // METRICS
    // =========================================================================

    pub fn observability_metrics(&self) -> MetricsSnapshot {
        self.observability_metrics_at(Utc::now())
    }

    pub fn observability_metrics_at(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        let (jobs, latency_ms) = {
            let state = self.lock();
            let jobs = JobCounts {
                in_queue: state.queue.len() as u64,
                active: u64::from(state.active_job.is_some()),
                completed: state.completed,
                failed: state.failed,
                fallbacks: state.fallbacks,
            };
            let latency_ms = LatencySnapshot {
                inference: state.inference_ms.stats().percentiles(),
                queue: state.queue_ms.stats().percentiles(),
            };
            (jobs, latency_ms)
        };

        MetricsSnapshot {
            rates: Rates::compute(jobs.completed, jobs.failed, jobs.fallbacks),
            jobs,
            latency_ms,
            maintenance_mode: self.maintenance.is_enabled(),
            circuit_breaker_state: self.breaker.state(),
            updated_at: now,
        }
    }
}
