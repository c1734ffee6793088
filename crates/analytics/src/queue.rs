//! Prioritized task queue over the key-value store
//!
//! Three lists (`analysis_tasks:{high,normal,low}`) with FIFO order within
//! each; the blocking pop scans high-first. Enqueueing past the configured
//! bound fails with `QueueFull`.

use std::sync::Arc;
use std::time::Duration;

use callguard_store::{keys, KeyValueStore};

use crate::task::{Priority, QueuedTask, TaskCompletion};
use crate::AnalyticsError;

/// Bounded priority queue for analysis tasks.
pub struct TaskQueue {
    store: Arc<dyn KeyValueStore>,
    bound: usize,
    pop_timeout: Duration,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, bound: usize, pop_timeout: Duration) -> Self {
        Self {
            store,
            bound,
            pop_timeout,
        }
    }

    /// Enqueue a task at its priority. Fails with `QueueFull` at the bound.
    pub async fn enqueue(&self, task: &QueuedTask) -> Result<(), AnalyticsError> {
        let queue_key = keys::task_queue(task.priority.as_str());

        let depth = self.store.llen(&queue_key).await?;
        if depth >= self.bound {
            metrics::counter!("callguard_queue_rejections_total").increment(1);
            return Err(AnalyticsError::QueueFull(format!(
                "{} at bound {}",
                queue_key, self.bound
            )));
        }

        let payload = serde_json::to_string(task)?;
        self.store.lpush(&queue_key, &payload).await?;
        metrics::counter!("callguard_tasks_enqueued_total").increment(1);
        tracing::debug!(
            task_id = %task.task_id,
            call_id = %task.call_id,
            kind = %task.kind,
            priority = task.priority.as_str(),
            "task enqueued"
        );
        Ok(())
    }

    /// Blocking pop across the priority lists, high first. `None` on
    /// timeout. A malformed payload is dropped with a warning.
    pub async fn pop(&self) -> Result<Option<QueuedTask>, AnalyticsError> {
        let queues: Vec<String> = Priority::ORDERED
            .iter()
            .map(|p| keys::task_queue(p.as_str()))
            .collect();

        match self.store.brpop(&queues, self.pop_timeout).await? {
            Some((queue, payload)) => match serde_json::from_str::<QueuedTask>(&payload) {
                Ok(task) => Ok(Some(task)),
                Err(e) => {
                    tracing::warn!(queue = %queue, error = %e, "dropping malformed task payload");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Current depth of one priority list.
    pub async fn depth(&self, priority: Priority) -> Result<usize, AnalyticsError> {
        Ok(self
            .store
            .llen(&keys::task_queue(priority.as_str()))
            .await?)
    }

    /// Publish a task completion on the result channel.
    pub async fn publish_completion(&self, completion: &TaskCompletion) -> Result<(), AnalyticsError> {
        let payload = serde_json::to_string(completion)?;
        self.store
            .publish(keys::ANALYSIS_RESULTS_CHANNEL, &payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;
    use callguard_store::MemoryStore;

    fn queue(bound: usize) -> TaskQueue {
        TaskQueue::new(
            Arc::new(MemoryStore::new()),
            bound,
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_priority_respected() {
        let queue = queue(100);

        // Enqueue low, normal, high at the same instant; the first pop
        // must yield the high task.
        queue
            .enqueue(&QueuedTask::new("c-low", TaskKind::Summary, Priority::Low))
            .await
            .unwrap();
        queue
            .enqueue(&QueuedTask::new(
                "c-normal",
                TaskKind::Summary,
                Priority::Normal,
            ))
            .await
            .unwrap();
        queue
            .enqueue(&QueuedTask::new("c-high", TaskKind::Summary, Priority::High))
            .await
            .unwrap();

        let order: Vec<String> = [
            queue.pop().await.unwrap().unwrap(),
            queue.pop().await.unwrap().unwrap(),
            queue.pop().await.unwrap().unwrap(),
        ]
        .into_iter()
        .map(|t| t.call_id)
        .collect();

        assert_eq!(order, vec!["c-high", "c-normal", "c-low"]);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = queue(100);
        for i in 0..3 {
            queue
                .enqueue(&QueuedTask::new(
                    format!("c-{}", i),
                    TaskKind::Effectiveness,
                    Priority::Normal,
                ))
                .await
                .unwrap();
        }

        for i in 0..3 {
            let task = queue.pop().await.unwrap().unwrap();
            assert_eq!(task.call_id, format!("c-{}", i));
        }
    }

    #[tokio::test]
    async fn test_bound_enforced() {
        let queue = queue(2);
        queue
            .enqueue(&QueuedTask::new("c-1", TaskKind::Summary, Priority::Normal))
            .await
            .unwrap();
        queue
            .enqueue(&QueuedTask::new("c-2", TaskKind::Summary, Priority::Normal))
            .await
            .unwrap();

        let err = queue
            .enqueue(&QueuedTask::new("c-3", TaskKind::Summary, Priority::Normal))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::QueueFull(_)));

        // Other priorities have their own bound.
        queue
            .enqueue(&QueuedTask::new("c-4", TaskKind::Summary, Priority::High))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pop_timeout_on_empty() {
        let queue = queue(10);
        assert!(queue.pop().await.unwrap().is_none());
    }
}
