use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::event_log::{EventCategory, EventLogger};
use crate::fetch::{run_fetch, FetchContext, FetchResult};
use crate::queue::{ResultCollector, TaskQueue};

/// An entry in the task queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Fetch the item with this id.
    Fetch(u32),
    /// No more work; the worker that takes this exits.
    Shutdown,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Fetch(id) => write!(f, "task_id={}", id),
            Task::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Configuration for a worker task.
pub struct WorkerConfig {
    pub worker_id: u32,
    pub tasks: Arc<TaskQueue<Task>>,
    pub results: Arc<ResultCollector<FetchResult>>,
    pub logger: Arc<EventLogger>,
    pub fetch: Arc<FetchContext>,
}

/// What one worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub succeeded: usize,
    pub failed: usize,
}

/// Runs one worker: take a task, fetch it, acknowledge, repeat until a
/// [`Task::Shutdown`] is taken.
///
/// A task in progress always runs to completion before the worker looks at the
/// queue again.
pub async fn run_worker(config: WorkerConfig) -> WorkerStats {
    let wid = Some(config.worker_id);
    let logger = &config.logger;
    let mut stats = WorkerStats::default();

    debug!(worker_id = config.worker_id, "Worker starting");
    logger.record(
        EventCategory::StepStart,
        format!("worker started: WID={}", config.worker_id),
        wid,
    );

    loop {
        logger.record(EventCategory::StepTodo, "waiting for task", wid);
        // Acknowledged on drop, unwinding included.
        let claim = config.tasks.claim().await;
        let task = *claim;
        logger.record(EventCategory::StepTodo, format!("task taken: {}", task), wid);

        match task {
            Task::Shutdown => {
                logger.record(EventCategory::StepFinish, "shutdown signal received", wid);
                break;
            }
            Task::Fetch(task_id) => {
                logger.record(
                    EventCategory::StepTodo,
                    format!("execution start: task_id={}", task_id),
                    wid,
                );
                let ok = run_fetch(
                    &config.fetch,
                    logger,
                    &config.results,
                    config.worker_id,
                    task_id,
                )
                .await;
                if ok {
                    stats.succeeded += 1;
                } else {
                    stats.failed += 1;
                }
                logger.record(
                    EventCategory::StepFinish,
                    format!("execution finished: task_id={}", task_id),
                    wid,
                );
            }
        }
    }

    logger.record(EventCategory::StepFinish, "worker stopped", wid);
    info!(
        worker_id = config.worker_id,
        succeeded = stats.succeeded,
        failed = stats.failed,
        "Worker stopped"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_display() {
        assert_eq!(Task::Fetch(4).to_string(), "task_id=4");
        assert_eq!(Task::Shutdown.to_string(), "shutdown");
    }

    #[tokio::test]
    async fn worker_exits_on_shutdown_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(
            EventLogger::create(dir.path().join("w.log"), dir.path().join("w.html")).unwrap(),
        );
        let tasks = Arc::new(TaskQueue::new());
        tasks.push(Task::Shutdown);

        let stats = run_worker(WorkerConfig {
            worker_id: 2,
            tasks: tasks.clone(),
            results: Arc::new(ResultCollector::new()),
            logger: logger.clone(),
            fetch: Arc::new(FetchContext {
                client: reqwest::Client::new(),
                endpoint_base: "http://127.0.0.1:9/db".to_string(),
                field: "ja".to_string(),
                placeholder: "(no ja)".to_string(),
            }),
        })
        .await;

        assert_eq!(stats, WorkerStats::default());
        assert_eq!(tasks.unfinished(), 0);
        // started, waiting, taken, shutdown received, stopped
        assert_eq!(logger.event_count(), 5);
    }
}
