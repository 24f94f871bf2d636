//! Integration tests for the job worker driving the extraction pipeline.
//!
//! Covers:
//! - Chunk timeout ends in a completed job flagged as fallback
//! - Single-chunk transcripts complete on the staged path with no conflicts
//! - Degraded breaker routes jobs to the stub without touching the backend
//! - Repeated failures raise a critical alert that degrades the breaker
//! - Worker lifecycle (start, events, shutdown)

use std::sync::Arc;
use std::time::Duration;

use medex_core::{
    BreakerState, ExtractRequest, ExtractorError, JobStatus, Speaker, Transcript, TranscriptSegment,
};
use medex_inference::MockExtractionBackend;
use medex_jobs::{
    AlertConfig, AlertEngine, CircuitBreaker, JobManager, JobManagerConfig, JobWorker,
    NotificationStubSink, PipelineHandler, WorkerConfig, WorkerEvent, WorkerHandle,
};
use medex_pipeline::{ChunkingConfig, PipelineConfig, PipelineOrchestrator};
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn consultation(n: usize, len_ms: u64) -> ExtractRequest {
    let segments = (0..n)
        .map(|i| {
            let speaker = if i % 2 == 0 { Speaker::Doctor } else { Speaker::Patient };
            TranscriptSegment::new(
                speaker,
                format!("turno {}", i),
                i as u64 * len_ms,
                (i as u64 + 1) * len_ms,
            )
        })
        .collect();
    ExtractRequest::new(Transcript::from_segments(segments, "es"))
}

struct Harness {
    manager: Arc<JobManager>,
    breaker: Arc<CircuitBreaker>,
    handle: WorkerHandle,
}

fn start(backend: MockExtractionBackend, pipeline: PipelineConfig) -> Harness {
    start_with(backend, pipeline, AlertConfig::default(), WorkerConfig::default())
}

fn start_with(
    backend: MockExtractionBackend,
    pipeline: PipelineConfig,
    alerts: AlertConfig,
    worker: WorkerConfig,
) -> Harness {
    let breaker = Arc::new(CircuitBreaker::default());
    let manager = Arc::new(JobManager::new(JobManagerConfig::default(), breaker.clone()));
    let orchestrator = Arc::new(PipelineOrchestrator::new(Arc::new(backend), pipeline));
    let alerts = Arc::new(AlertEngine::new(&alerts, breaker.clone()));

    let handle = JobWorker::new(manager.clone(), Arc::new(PipelineHandler::new(orchestrator)), worker)
        .with_alert_engine(alerts)
        .start();

    Harness {
        manager,
        breaker,
        handle,
    }
}

/// Wait for the worker to report `job_id` as finished.
async fn wait_for_finish(events: &mut broadcast::Receiver<WorkerEvent>, job_id: Uuid) -> WorkerEvent {
    let wait = async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            let finished = match &event {
                WorkerEvent::JobCompleted { job_id: id, .. } | WorkerEvent::JobFailed { job_id: id, .. } => {
                    *id == job_id
                }
                _ => false,
            };
            if finished {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(900), wait)
        .await
        .expect("job did not finish in time")
}

// ============================================================================
// PIPELINE END-TO-END
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_chunk_timeout_completes_with_fallback() {
    // Six one-second segments, two-second chunks: three chunks.
    let backend = MockExtractionBackend::new().with_chunk_delay_ms(1, 90_000);
    let pipeline = PipelineConfig::default().with_chunking(ChunkingConfig::duration_only(2000));
    let h = start(backend.clone(), pipeline);
    let mut events = h.handle.events();

    let job_id = h.manager.submit("doctor-1", consultation(6, 1000)).unwrap();
    let event = wait_for_finish(&mut events, job_id).await;
    assert_eq!(
        event,
        WorkerEvent::JobCompleted {
            job_id,
            fallback_used: true
        }
    );

    let view = h.manager.status(job_id).unwrap();
    assert_eq!(view.status, JobStatus::Done);
    assert!(view.fallback_used);
    let result = view.result.unwrap();
    let reason = result["pipeline"]["fallbackReason"].as_str().unwrap();
    assert!(reason.contains("timeout"));
    assert_eq!(result["pipeline"]["pipelineUsed"], "fallback_baseline");
    assert_eq!(backend.full_call_count(), 1);

    let metrics = h.manager.observability_metrics();
    assert_eq!(metrics.jobs.completed, 1);
    assert_eq!(metrics.jobs.fallbacks, 1);
}

#[tokio::test]
async fn test_single_chunk_completes_without_conflicts() {
    let backend = MockExtractionBackend::new();
    let h = start(backend.clone(), PipelineConfig::default());
    let mut events = h.handle.events();

    let job_id = h.manager.submit("doctor-1", consultation(4, 1000)).unwrap();
    wait_for_finish(&mut events, job_id).await;

    let view = h.manager.status(job_id).unwrap();
    assert_eq!(view.status, JobStatus::Done);
    assert!(!view.fallback_used);
    let result = view.result.unwrap();
    assert_eq!(result["pipeline"]["chunksCount"], 1);
    assert_eq!(result["pipeline"]["conflictCount"], 0);
    assert_eq!(result["fields"]["chiefComplaint"], "turno 1");
    assert_eq!(backend.chunk_call_count(), 1);

    // The slot is released, so the same user may submit again.
    assert!(h.manager.submit("doctor-1", consultation(2, 1000)).is_ok());
}

#[tokio::test]
async fn test_degraded_breaker_uses_stub() {
    let backend = MockExtractionBackend::new();
    let h = start(backend.clone(), PipelineConfig::default());
    h.breaker.set_manual_override(Some(BreakerState::Degraded));
    let mut events = h.handle.events();

    let job_id = h.manager.submit("doctor-1", consultation(4, 1000)).unwrap();
    wait_for_finish(&mut events, job_id).await;

    let view = h.manager.status(job_id).unwrap();
    assert_eq!(view.status, JobStatus::Done);
    assert!(view.fallback_used);
    assert_eq!(view.result.unwrap()["modelVersion"], "fallback-heuristic");
    assert!(backend.get_calls().is_empty());
}

#[tokio::test]
async fn test_failures_degrade_breaker_through_alerts() {
    let backend = MockExtractionBackend::new()
        .with_chunk_failure(0, ExtractorError::BackendUnavailable("down".into()))
        .with_full_failure(ExtractorError::BackendUnavailable("down".into()));
    let h = start(backend.clone(), PipelineConfig::default());
    let mut events = h.handle.events();

    for i in 0..5 {
        let job_id = h.manager.submit(&format!("doctor-{}", i), consultation(2, 1000)).unwrap();
        let event = wait_for_finish(&mut events, job_id).await;
        assert!(matches!(event, WorkerEvent::JobFailed { .. }));
    }

    // Five failures reach the minimum volume for the failure-rate alert.
    assert_eq!(h.breaker.state(), BreakerState::Degraded);
    assert_eq!(h.manager.observability_metrics().jobs.failed, 5);

    let calls_before = backend.get_calls().len();
    let job_id = h.manager.submit("doctor-9", consultation(2, 1000)).unwrap();
    let event = wait_for_finish(&mut events, job_id).await;
    assert_eq!(
        event,
        WorkerEvent::JobCompleted {
            job_id,
            fallback_used: true
        }
    );
    assert_eq!(backend.get_calls().len(), calls_before);
}

#[tokio::test]
async fn test_alert_sinks_receive_congestion() {
    let breaker = Arc::new(CircuitBreaker::default());
    let manager = Arc::new(JobManager::new(JobManagerConfig::default(), breaker.clone()));
    let sink = Arc::new(NotificationStubSink::new("#alerts"));
    let engine = AlertEngine::new(
        &AlertConfig::default().with_queue_congestion_jobs(2),
        breaker.clone(),
    )
    .with_sink(sink.clone());

    for i in 0..3 {
        manager.submit(&format!("doctor-{}", i), consultation(2, 1000)).unwrap();
    }
    let events = engine.evaluate(&manager.observability_metrics());

    assert_eq!(events.len(), 1);
    assert_eq!(sink.sent().len(), 1);
    assert_eq!(breaker.state(), BreakerState::Degraded);
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_worker_shutdown() {
    let h = start(MockExtractionBackend::new(), PipelineConfig::default());
    let mut events = h.handle.events();

    h.handle.shutdown().await.unwrap();
    let wait = async {
        loop {
            if let Ok(WorkerEvent::WorkerStopped) = events.recv().await {
                break;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("worker did not stop");
    h.handle.join().await.unwrap();
}

#[tokio::test]
async fn test_disabled_worker_leaves_jobs_queued() {
    let h = start_with(
        MockExtractionBackend::new(),
        PipelineConfig::default(),
        AlertConfig::default(),
        WorkerConfig::default().with_enabled(false),
    );
    let job_id = h.manager.submit("doctor-1", consultation(2, 1000)).unwrap();

    let manager = h.manager.clone();
    h.handle.join().await.unwrap();
    assert_eq!(manager.status(job_id).unwrap().status, JobStatus::Queued);
    assert_eq!(manager.queue_position(job_id), Some(1));
}

#[tokio::test]
async fn test_jobs_run_in_submission_order() {
    let backend = MockExtractionBackend::new();
    let h = start(backend, PipelineConfig::default());
    let mut events = h.handle.events();

    let ids: Vec<Uuid> = (0..3)
        .map(|i| {
            h.manager
                .submit(&format!("doctor-{}", i), consultation(2, 1000))
                .unwrap()
        })
        .collect();

    let mut started = Vec::new();
    while started.len() < 3 {
        if let Ok(WorkerEvent::JobStarted { job_id, .. }) = events.recv().await {
            started.push(job_id);
        }
    }
    assert_eq!(started, ids);
}
