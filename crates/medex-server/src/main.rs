//! Process host for medex extraction jobs.
//!
//! Wires one instance of each component (breaker, job manager, alert engine,
//! pipeline orchestrator, worker), submits the given request files through
//! the job manager one after another, prints each job status and the final
//! metrics snapshot as JSON, then shuts the worker down.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use medex_core::{ExtractRequest, JobStatusView, Transcript};
use medex_inference::MockExtractionBackend;
use medex_jobs::{
    AlertConfig, AlertEngine, CircuitBreaker, CircuitBreakerConfig, JobManager, JobManagerConfig,
    JobWorker, NotificationStubSink, PipelineHandler, WorkerConfig,
};
use medex_pipeline::{PipelineConfig, PipelineOrchestrator};

#[derive(Parser)]
#[command(name = "medex-server")]
#[command(about = "Run clinical transcript extraction jobs through the job queue")]
#[command(version)]
struct Cli {
    /// Owner of the submitted jobs
    #[arg(long, env = "MEDEX_USER", default_value = "local")]
    user: String,

    /// Status poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,

    /// Give up waiting on a job after this many seconds
    #[arg(long, default_value_t = 600)]
    wait_timeout_secs: u64,

    /// Notification channel for the alert stub sink
    #[arg(long, env = "ALERT_NOTIFY_CHANNEL", default_value = "#medex-alerts")]
    alert_channel: String,

    /// Extract request JSON files
    #[arg(required = true)]
    requests: Vec<PathBuf>,
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: info for the medex_* crates)
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "medex_core=info,medex_inference=info,medex_pipeline=info,medex_jobs=info,medex_server=info"
            .into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("medex-server.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Logs go to stderr; stdout carries the JSON results.
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );
    guard
}

fn load_request(path: &Path) -> anyhow::Result<ExtractRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut request: ExtractRequest = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    if request.transcript.duration_ms == 0 {
        let Transcript {
            segments, language, ..
        } = request.transcript;
        request.transcript = Transcript::from_segments(segments, language);
    }
    Ok(request)
}

async fn wait_for_terminal(
    manager: &JobManager,
    job_id: Uuid,
    poll: Duration,
    limit: Duration,
) -> anyhow::Result<JobStatusView> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        match manager.status(job_id) {
            Some(view) if view.status.is_terminal() => return Ok(view),
            Some(_) => {}
            None => bail!("job {} expired before completion", job_id),
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("timed out waiting for job {}", job_id);
        }
        tokio::time::sleep(poll).await;
    }
}

async fn run_batch(cli: &Cli, manager: &JobManager) -> anyhow::Result<()> {
    let poll = Duration::from_millis(cli.poll_interval_ms.max(1));
    let limit = Duration::from_secs(cli.wait_timeout_secs);

    for path in &cli.requests {
        let request = load_request(path)?;
        let job_id = match manager.submit(&cli.user, request) {
            Ok(id) => id,
            Err(e) => {
                warn!(subsystem = "server", file = %path.display(), error = %e, "Submission rejected");
                println!(
                    "{}",
                    serde_json::json!({ "file": path.display().to_string(), "error": e.to_string() })
                );
                continue;
            }
        };

        let view = wait_for_terminal(manager, job_id, poll, limit).await?;
        println!("{}", serde_json::to_string_pretty(&view.to_wire())?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();
    let cli = Cli::parse();

    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::from_env()));
    let manager = Arc::new(JobManager::new(JobManagerConfig::from_env(), breaker.clone()));
    let alerts = Arc::new(
        AlertEngine::new(&AlertConfig::from_env(), breaker.clone())
            .with_sink(Arc::new(NotificationStubSink::new(cli.alert_channel.clone()))),
    );
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        Arc::new(MockExtractionBackend::new()),
        PipelineConfig::from_env(),
    ));

    let handle = JobWorker::new(
        manager.clone(),
        Arc::new(PipelineHandler::new(orchestrator)),
        WorkerConfig::from_env(),
    )
    .with_alert_engine(alerts)
    .start();
    info!(subsystem = "server", files = cli.requests.len(), "Batch started");

    let outcome = tokio::select! {
        result = run_batch(&cli, &manager) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(subsystem = "server", "Interrupted, shutting down");
            Ok(())
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&manager.observability_metrics().to_wire())?
    );

    // The worker may already be gone if it was disabled by config.
    if handle.shutdown().await.is_err() {
        info!(subsystem = "server", "Worker already stopped");
    }
    handle.join().await?;
    info!(subsystem = "server", "Shutdown complete");

    outcome
}
