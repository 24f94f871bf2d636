//! Single worker loop that drains the job manager's queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use medex_core::config::{env_flag, env_or};
use medex_core::{defaults, BreakerState, Error, Job, Result};

use crate::alerting::AlertEngine;
use crate::handler::{DegradedHandler, JobContext, JobHandler, JobResult};
use crate::manager::JobManager;

/// Configuration for the job worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Interval of the idle maintenance tick (TTL sweep, alerts, recovery).
    pub maintenance_tick: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            maintenance_tick: Duration::from_secs(defaults::JOB_MAINTENANCE_TICK_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAINTENANCE_TICK_SECS` | `60` | Idle maintenance interval |
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag("JOB_WORKER_ENABLED", true),
            maintenance_tick: Duration::from_secs(
                env_or("JOB_MAINTENANCE_TICK_SECS", defaults::JOB_MAINTENANCE_TICK_SECS).max(1),
            ),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_maintenance_tick(mut self, tick: Duration) -> Self {
        self.maintenance_tick = tick;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted,
    JobStarted { job_id: Uuid, degraded: bool },
    JobCompleted { job_id: Uuid, fallback_used: bool },
    JobFailed { job_id: Uuid, error: String },
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop after the job in flight, if any.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))
    }

    /// Wait for the worker loop to exit.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("worker task failed: {}", e)))
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Processes jobs strictly one at a time.
pub struct JobWorker {
    manager: Arc<JobManager>,
    handler: Arc<dyn JobHandler>,
    degraded_handler: Arc<dyn JobHandler>,
    alerts: Option<Arc<AlertEngine>>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a worker running `handler` for every job, or the degraded stub
    /// while the breaker reports `Degraded`.
    pub fn new(manager: Arc<JobManager>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            manager,
            handler,
            degraded_handler: Arc::new(DegradedHandler),
            alerts: None,
            config,
            event_tx,
        }
    }

    pub fn with_alert_engine(mut self, alerts: Arc<AlertEngine>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn with_degraded_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.degraded_handler = handler;
        self
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Drain the queue, then wait for either a new submission, the
    /// maintenance tick, or shutdown.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!(subsystem = "jobs", "Job worker is disabled, not starting");
            return;
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            maintenance_tick_secs = self.config.maintenance_tick.as_secs(),
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let tick = self.config.maintenance_tick;
        let mut ticker = interval_at(Instant::now() + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!(subsystem = "jobs", "Job worker received shutdown signal");
                break;
            }

            if let Some(job) = self.manager.claim_next() {
                self.execute_job(job).await;
                self.evaluate_health();
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(subsystem = "jobs", "Job worker received shutdown signal");
                    break;
                }
                _ = self.manager.job_available() => {}
                _ = ticker.tick() => {
                    self.manager.sweep_expired();
                    self.evaluate_health();
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!(subsystem = "jobs", "Job worker stopped");
    }

    /// Run one claimed job to completion. The handler runs in its own task
    /// so a panic fails the job instead of the worker.
    async fn execute_job(&self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let degraded = self.manager.breaker().state() == BreakerState::Degraded;
        let handler = if degraded {
            warn!(subsystem = "jobs", %job_id, "Executing in degraded mode");
            self.degraded_handler.clone()
        } else {
            self.handler.clone()
        };

        info!(subsystem = "jobs", %job_id, handler = handler.name(), "Processing job");
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id, degraded });

        let ctx = JobContext::new(job);
        let result = match tokio::spawn(async move { handler.execute(ctx).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(subsystem = "jobs", %job_id, error = %e, "Job handler panicked");
                JobResult::Failed("job handler panicked".to_string())
            }
        };

        let event = match &result {
            JobResult::Success(output) => WorkerEvent::JobCompleted {
                job_id,
                fallback_used: output.fallback_used,
            },
            JobResult::Failed(error) => WorkerEvent::JobFailed {
                job_id,
                error: error.clone(),
            },
        };

        self.manager.complete_job(job_id, result);
        info!(
            subsystem = "jobs",
            %job_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Job processed"
        );
        let _ = self.event_tx.send(event);
    }

    /// Alerts first, so a critical alert is visible to the recovery check.
    fn evaluate_health(&self) {
        let metrics = self.manager.observability_metrics();
        if let Some(alerts) = &self.alerts {
            alerts.evaluate(&metrics);
        }
        self.manager.breaker().evaluate_recovery(&metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.maintenance_tick, Duration::from_secs(60));
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_enabled(false)
            .with_maintenance_tick(Duration::from_secs(5));
        assert!(!config.enabled);
        assert_eq!(config.maintenance_tick, Duration::from_secs(5));
    }
}
