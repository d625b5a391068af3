mod config;
mod evaluator;
mod executor;
mod race;
mod sandbox;
mod sink;

use config::LanguageConfigManager;
use executor::{JobOutcome, WorkerDeps};
use gavel_common::redis;
use race::DeadlinePolicy;
use sandbox::DockerSandboxAdapter;
use sink::{RedisProblemStore, RedisResultSink};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_BASE_DEADLINE_MS: u64 = 10_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Gavel worker booting...");

    let config_manager = LanguageConfigManager::load_default().map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        error!("Make sure config/languages.json exists");
        e
    })?;

    info!(
        "Loaded language configurations for: {:?}",
        config_manager.list_languages()
    );

    let base_deadline_ms = std::env::var("BASE_DEADLINE_MS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(DEFAULT_BASE_DEADLINE_MS);
    let deadlines = DeadlinePolicy::new(base_deadline_ms, config_manager.deadline_extensions());

    info!(base_deadline_ms, "Deadline policy configured");

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let client = ::redis::Client::open(redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client).await?;

    info!("Connected to Redis: {}", redis_url);

    let deps = WorkerDeps {
        adapter: Arc::new(DockerSandboxAdapter::new(&config_manager)?),
        problems: Arc::new(RedisProblemStore::new(redis_conn.clone())),
        sink: Arc::new(RedisResultSink::new(redis_conn.clone())),
        deadlines,
    };

    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        warn!("Received shutdown signal, draining queue...");
    };

    tokio::select! {
        _ = worker_loop(&mut redis_conn, &deps) => {},
        _ = shutdown => {},
    }

    info!("Worker shutdown complete");
    Ok(())
}

async fn worker_loop(
    redis_conn: &mut ::redis::aio::ConnectionManager,
    deps: &WorkerDeps,
) -> anyhow::Result<()> {
    loop {
        // BLPOP with 5 second timeout so shutdown can interleave
        match redis::pop_job(redis_conn, 5.0).await {
            Ok(Some(job)) => {
                let submission_id = job.submission_id.clone();
                info!(
                    submission_id = %submission_id,
                    language = %job.language,
                    problem_statement_id = %job.problem_statement_id,
                    temp = job.temp,
                    source_size = job.code.len(),
                    "Received job"
                );

                // One attempt per delivery; the orchestrator never raises.
                let start = std::time::Instant::now();
                let outcome = executor::execute(job, deps).await;
                let elapsed_ms = start.elapsed().as_millis() as u64;

                match outcome {
                    JobOutcome::Completed { passed, total } => {
                        info!(
                            submission_id = %submission_id,
                            passed,
                            total,
                            elapsed_ms,
                            "Job executed"
                        );
                    }
                    JobOutcome::TimedOut => {
                        info!(submission_id = %submission_id, elapsed_ms, "Job hit the deadline");
                    }
                    JobOutcome::UnsupportedLanguage => {
                        info!(submission_id = %submission_id, "Job rejected: unsupported language");
                    }
                    JobOutcome::Dropped(reason) => {
                        info!(submission_id = %submission_id, ?reason, "Job dropped");
                    }
                    JobOutcome::Faulted => {
                        warn!(
                            submission_id = %submission_id,
                            elapsed_ms,
                            "Job ran but its result was not recorded"
                        );
                    }
                }
            }
            Ok(None) => {
                // Poll timeout - loop around
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}
