//! Drives one complete run: server up, pool up, tasks in, drain, pool down,
//! results out, server down, log closed.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::client::build_client;
use crate::config::Config;
use crate::errors::HarnessError;
use crate::event_log::{EventCategory, EventLogger};
use crate::fetch::{FetchContext, FetchResult};
use crate::queue::{ResultCollector, TaskQueue};
use crate::server::{wait_until_ready, ServerProcess};
use crate::worker::{run_worker, Task, WorkerConfig, WorkerStats};

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Drained results, in collector order.
    pub results: Vec<FetchResult>,
    pub succeeded: usize,
    pub failed: usize,
    /// Total events written to the log artifacts.
    pub events: u64,
    pub plain_log: PathBuf,
    pub markup_log: PathBuf,
}

/// Runs the whole workload described by `config`.
///
/// The log artifacts are finalized on every path out of this function. Startup,
/// shutdown and worker failures are recorded as `run-error` events and returned
/// as errors after the log is closed.
pub async fn run(config: &Config) -> Result<RunReport, HarnessError> {
    let logger = Arc::new(EventLogger::create(
        config.plain_log_path(),
        config.markup_log_path(),
    )?);

    let outcome = drive(config, &logger).await;
    if let Err(ref e) = outcome {
        logger.record(EventCategory::RunError, format!("run failed: {}", e), None);
        error!(error = %e, "Run failed");
    }
    logger.finish()?;

    outcome.map(|(results, stats)| RunReport {
        results,
        succeeded: stats.succeeded,
        failed: stats.failed,
        events: logger.event_count(),
        plain_log: logger.plain_path().to_path_buf(),
        markup_log: logger.markup_path().to_path_buf(),
    })
}

async fn drive(
    config: &Config,
    logger: &Arc<EventLogger>,
) -> Result<(Vec<FetchResult>, WorkerStats), HarnessError> {
    let client = build_client(&config.to_client_config())?;

    let mut server = if config.launch_server {
        Some(start_server(config, logger, &client).await?)
    } else {
        logger.record(
            EventCategory::RunStart,
            format!("using running server: {}", config.endpoint_base()),
            None,
        );
        None
    };

    let fetch = Arc::new(FetchContext {
        client,
        endpoint_base: config.endpoint_base(),
        field: config.field.clone(),
        placeholder: config.placeholder.clone(),
    });
    let tasks = Arc::new(TaskQueue::new());
    let results = Arc::new(ResultCollector::new());

    // Workers
    logger.record(
        EventCategory::RunStart,
        format!("starting workers: NUM_WORKERS={}", config.num_workers),
        None,
    );
    let mut handles: Vec<(u32, JoinHandle<WorkerStats>)> = Vec::new();
    for worker_id in 1..=config.num_workers {
        logger.record(
            EventCategory::StepTodo,
            format!("spawning worker: Worker-{}", worker_id),
            None,
        );
        let worker_config = WorkerConfig {
            worker_id,
            tasks: tasks.clone(),
            results: results.clone(),
            logger: logger.clone(),
            fetch: fetch.clone(),
        };
        handles.push((worker_id, tokio::spawn(run_worker(worker_config))));
        logger.record(
            EventCategory::StepDone,
            format!("worker spawned: Worker-{}", worker_id),
            None,
        );
    }
    logger.record(EventCategory::RunDone, "all workers started", None);

    // Tasks
    logger.record(
        EventCategory::RunStart,
        format!("queueing tasks: count={}", config.num_tasks),
        None,
    );
    for task_id in 1..=config.num_tasks {
        logger.record(
            EventCategory::StepTodo,
            format!("task queued: task_id={}", task_id),
            None,
        );
        tasks.push(Task::Fetch(task_id));
    }
    logger.record(EventCategory::RunDone, "all tasks queued", None);

    logger.record(EventCategory::RunStart, "waiting for all tasks", None);
    tasks.wait_drained().await;
    logger.record(EventCategory::RunDone, "all tasks acknowledged", None);

    // Shutdown
    logger.record(EventCategory::RunStart, "sending shutdown signals", None);
    for _ in &handles {
        tasks.push(Task::Shutdown);
    }
    let mut totals = WorkerStats::default();
    let mut abnormal = 0;
    for (worker_id, handle) in handles {
        logger.record(
            EventCategory::StepTodo,
            format!("joining worker: Worker-{}", worker_id),
            None,
        );
        match handle.await {
            Ok(stats) => {
                totals.succeeded += stats.succeeded;
                totals.failed += stats.failed;
                logger.record(
                    EventCategory::StepDone,
                    format!("worker joined: Worker-{}", worker_id),
                    None,
                );
            }
            Err(e) => {
                abnormal += 1;
                logger.record(
                    EventCategory::RunError,
                    format!("worker ended abnormally: Worker-{}: {}", worker_id, e),
                    None,
                );
            }
        }
    }
    logger.record(EventCategory::RunDone, "all workers stopped", None);

    // Results
    logger.record(EventCategory::RunStart, "result output start", None);
    let drained = results.drain();
    for result in &drained {
        logger.record(
            EventCategory::StepDone,
            format!("result: {} -> {}", result.task_id, result.value),
            None,
        );
    }
    logger.record(EventCategory::RunDone, "result output done", None);

    logger.record(
        EventCategory::RunFinish,
        format!(
            "all complete: succeeded={}, failed={}",
            totals.succeeded, totals.failed
        ),
        None,
    );
    info!(
        succeeded = totals.succeeded,
        failed = totals.failed,
        "All tasks processed"
    );

    if let Some(server) = server.as_mut() {
        stop_server(config, logger, server).await?;
    }

    if abnormal > 0 {
        return Err(HarnessError::WorkersFailed(abnormal));
    }
    Ok((drained, totals))
}

async fn start_server(
    config: &Config,
    logger: &EventLogger,
    client: &reqwest::Client,
) -> Result<ServerProcess, HarnessError> {
    let script = config.server_script();
    logger.record(
        EventCategory::RunStart,
        format!("server launch prepare: {}", script.display()),
        None,
    );
    let mut server = ServerProcess::launch(&config.python, &script)?;
    logger.record(
        EventCategory::StepTodo,
        format!(
            "server launch command sent: pid={}, settle={:?}",
            server.id().map_or_else(|| "-".to_string(), |id| id.to_string()),
            config.settle_delay
        ),
        None,
    );

    sleep(config.settle_delay).await;
    let mut ready = server.check_running();
    if ready.is_ok() && config.ready_probe {
        let probe_url = crate::fetch::item_url(&config.endpoint_base(), 1);
        logger.record(
            EventCategory::StepTodo,
            format!("readiness probe: {}", probe_url),
            None,
        );
        ready = wait_until_ready(client, &probe_url, config.ready_timeout)
            .await
            .map(|waited| {
                logger.record(
                    EventCategory::StepTodo,
                    format!("server answered after {:.3}s", waited.as_secs_f64()),
                    None,
                );
            });
    }

    if let Err(e) = ready {
        logger.record(
            EventCategory::RunError,
            format!("server not ready: {}", e),
            None,
        );
        // The process may still be alive (probe timeout); do not leave it behind.
        if stop_server(config, logger, &mut server).await.is_err() {
            error!(script = ?script, "Failed to stop server after failed startup");
        }
        return Err(e);
    }

    logger.record(
        EventCategory::StepDone,
        format!("server launch complete: port={}", config.backend.port()),
        None,
    );
    Ok(server)
}

async fn stop_server(
    config: &Config,
    logger: &EventLogger,
    server: &mut ServerProcess,
) -> Result<(), HarnessError> {
    logger.record(EventCategory::RunStart, "server stop start", None);
    let stopped = match server.terminate() {
        Ok(()) => {
            logger.record(EventCategory::StepTodo, "server terminate sent", None);
            server.wait(config.shutdown_grace).await
        }
        Err(e) => Err(e),
    };
    match stopped {
        Ok(status) => {
            logger.record(
                EventCategory::StepDone,
                format!("server stopped: {}", status),
                None,
            );
            Ok(())
        }
        Err(e) => {
            logger.record(
                EventCategory::RunError,
                format!("server stop failed: {}", e),
                None,
            );
            Err(e)
        }
    }
}
