//! # medex-jobs
//!
//! Job orchestration for medex extraction.
//!
//! This crate provides:
//! - A single-worker FIFO job manager with per-user exclusivity and daily quotas
//! - A tri-state circuit breaker with exponential-backoff recovery
//! - Rule-based alerting that drives the breaker
//! - The worker loop, job handlers, and maintenance mode
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use medex_jobs::*;
//!
//! let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::from_env()));
//! let manager = Arc::new(JobManager::new(JobManagerConfig::from_env(), breaker.clone()));
//! let alerts = Arc::new(AlertEngine::new(&AlertConfig::from_env(), breaker));
//!
//! let worker = JobWorker::new(manager.clone(), Arc::new(PipelineHandler::new(orchestrator)), WorkerConfig::from_env())
//!     .with_alert_engine(alerts);
//! let handle = worker.start();
//!
//! let job_id = manager.submit("user-1", request)?;
//! // ... poll manager.status(job_id)
//!
//! handle.shutdown().await?;
//! handle.join().await?;
//! ```

pub mod alerting;
pub mod circuit_breaker;
pub mod handler;
pub mod maintenance;
pub mod manager;
pub mod worker;

pub use alerting::{
    AlertConfig, AlertEngine, AlertEvent, AlertRule, AlertSeverity, AlertSink, LoggingAlertSink,
    NotificationStubSink,
};
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
pub use handler::{DegradedHandler, JobContext, JobHandler, JobOutput, JobResult, PipelineHandler};
pub use maintenance::MaintenanceMode;
pub use manager::{JobManager, JobManagerConfig};
pub use worker::{JobWorker, WorkerConfig, WorkerEvent, WorkerHandle};
