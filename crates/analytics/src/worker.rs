//! Worker pool
//!
//! Long-lived workers pull from the priority queue and run the pipeline
//! handler, cooperatively bounded by a semaphore. Shutdown is cooperative:
//! workers finish their current task inside a grace window. A failed task
//! is published as failed and never takes its worker down; high-priority
//! tasks retry with exponential backoff before giving up.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use callguard_config::PipelineSettings;

use crate::pipeline::AnalysisPipeline;
use crate::queue::TaskQueue;
use crate::task::{Priority, QueuedTask, TaskCompletion};

/// Fixed-size pool of analysis workers.
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    pipeline: Arc<AnalysisPipeline>,
    worker_count: usize,
    semaphore: Arc<Semaphore>,
    high_priority_retries: u32,
    grace: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<TaskQueue>,
        pipeline: Arc<AnalysisPipeline>,
        settings: &PipelineSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            pipeline,
            worker_count: settings.max_concurrent_analyses,
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_analyses)),
            high_priority_retries: settings.high_priority_retries,
            grace: Duration::from_secs(settings.shutdown_grace_secs),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        for worker_id in 0..self.worker_count {
            let queue = self.queue.clone();
            let pipeline = self.pipeline.clone();
            let semaphore = self.semaphore.clone();
            let retries = self.high_priority_retries;
            let shutdown_rx = self.shutdown_tx.subscribe();

            handles.push(tokio::spawn(Self::worker_loop(
                worker_id, queue, pipeline, semaphore, retries, shutdown_rx,
            )));
        }
        tracing::info!(workers = self.worker_count, "analysis worker pool started");
    }

    async fn worker_loop(
        worker_id: usize,
        queue: Arc<TaskQueue>,
        pipeline: Arc<AnalysisPipeline>,
        semaphore: Arc<Semaphore>,
        retries: u32,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let popped = tokio::select! {
                _ = shutdown_rx.changed() => break,
                popped = queue.pop() => popped,
            };

            let task = match popped {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(worker_id, error = %e, "queue pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            Self::process(worker_id, &queue, &pipeline, retries, task).await;
            drop(permit);
        }
        tracing::debug!(worker_id, "analysis worker stopped");
    }

    async fn process(
        worker_id: usize,
        queue: &TaskQueue,
        pipeline: &AnalysisPipeline,
        retries: u32,
        task: QueuedTask,
    ) {
        let attempts = if task.priority == Priority::High {
            retries + 1
        } else {
            1
        };

        let mut backoff = Duration::from_millis(100);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tracing::warn!(
                    worker_id,
                    task_id = %task.task_id,
                    attempt,
                    "retrying high priority task"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match pipeline.handle(&task).await {
                Ok(result) => {
                    metrics::counter!("callguard_tasks_completed_total").increment(1);
                    let completion = TaskCompletion::completed(&task, result);
                    if let Err(e) = queue.publish_completion(&completion).await {
                        tracing::warn!(task_id = %task.task_id, error = %e, "result publish failed");
                    }
                    Self::account_batch(pipeline, &task).await;
                    return;
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }
        }

        let error = last_error.unwrap_or_else(|| "unknown failure".to_string());
        tracing::error!(
            worker_id,
            task_id = %task.task_id,
            call_id = %task.call_id,
            kind = %task.kind,
            error = %error,
            "task failed"
        );
        metrics::counter!("callguard_tasks_failed_total").increment(1);
        let completion = TaskCompletion::failed(&task, error);
        if let Err(e) = queue.publish_completion(&completion).await {
            tracing::warn!(task_id = %task.task_id, error = %e, "failure publish failed");
        }
        // A failed child still advances its batch so the batch completes.
        Self::account_batch(pipeline, &task).await;
    }

    async fn account_batch(pipeline: &AnalysisPipeline, task: &QueuedTask) {
        if let Some(batch_id) = task.arg_str("batch_id") {
            if let Err(e) = pipeline.batch_coordinator().on_child_complete(batch_id).await {
                tracing::warn!(batch_id = %batch_id, error = %e, "batch accounting failed");
            }
        }
    }

    /// Cooperative shutdown: signal, then wait for workers up to the grace
    /// window.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if tokio::time::timeout(self.grace, handle).await.is_err() {
                tracing::warn!("worker did not stop within grace window");
            }
        }
        tracing::info!("analysis worker pool stopped");
    }
}
