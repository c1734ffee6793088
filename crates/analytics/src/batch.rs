//! Batch analysis jobs
//!
//! A batch fans out one `full_analysis` task per member call at the
//! requested priority. The batch record lives under `batch:{id}` with a
//! finite TTL; a separate counter tracks child completions exactly once
//! each, and the configured callback fires at least once when the last
//! child finishes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use callguard_store::{keys, KeyValueStore};

use crate::queue::TaskQueue;
use crate::task::{Priority, QueuedTask, TaskKind};
use crate::AnalyticsError;

/// Persisted batch record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub batch_id: String,
    pub user_id: String,
    pub call_ids: Vec<String>,
    pub priority: Priority,
    pub total_calls: usize,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Call ids whose child task could not be enqueued (queue bound).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enqueue_failures: Vec<String>,
}

/// Point-in-time batch progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub batch_id: String,
    pub status: String,
    pub total_calls: usize,
    pub completed_calls: usize,
    pub progress: f32,
}

/// Coordinates batch submission and completion accounting.
pub struct BatchCoordinator {
    store: Arc<dyn KeyValueStore>,
    queue: Arc<TaskQueue>,
    ttl: Duration,
    http: reqwest::Client,
}

impl BatchCoordinator {
    pub fn new(store: Arc<dyn KeyValueStore>, queue: Arc<TaskQueue>, ttl: Duration) -> Self {
        Self {
            store,
            queue,
            ttl,
            http: reqwest::Client::new(),
        }
    }

    fn counter_key(batch_id: &str) -> String {
        format!("{}:completed", keys::batch(batch_id))
    }

    /// Submit a batch. Child enqueues may partial-fail under backpressure;
    /// failed members are reported on the job and excluded from the total.
    pub async fn submit(
        &self,
        user_id: &str,
        call_ids: Vec<String>,
        priority: Priority,
        callback_url: Option<String>,
    ) -> Result<BatchJob, AnalyticsError> {
        if call_ids.is_empty() {
            return Err(AnalyticsError::Task("batch has no call ids".into()));
        }

        let batch_id = Uuid::new_v4().to_string();
        let mut enqueue_failures = Vec::new();

        for call_id in &call_ids {
            let task = QueuedTask::new(call_id.clone(), TaskKind::FullAnalysis, priority)
                .with_arg("batch_id", serde_json::json!(batch_id))
                .with_arg("user_id", serde_json::json!(user_id));
            match self.queue.enqueue(&task).await {
                Ok(()) => {}
                Err(AnalyticsError::QueueFull(_)) => {
                    tracing::warn!(batch_id = %batch_id, call_id = %call_id, "batch child rejected, queue full");
                    enqueue_failures.push(call_id.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let total_calls = call_ids.len() - enqueue_failures.len();
        if total_calls == 0 {
            return Err(AnalyticsError::QueueFull(format!(
                "no batch children enqueued for {}",
                batch_id
            )));
        }

        let job = BatchJob {
            batch_id: batch_id.clone(),
            user_id: user_id.to_string(),
            call_ids,
            priority,
            total_calls,
            status: "queued".to_string(),
            created_at: Utc::now(),
            completed_at: None,
            callback_url,
            enqueue_failures,
        };

        self.store
            .set_ex(
                &keys::batch(&batch_id),
                &serde_json::to_string(&job)?,
                self.ttl,
            )
            .await?;

        tracing::info!(
            batch_id = %batch_id,
            total = job.total_calls,
            priority = priority.as_str(),
            "batch submitted"
        );
        Ok(job)
    }

    /// Record one child completion. Exactly one increment per child; the
    /// final child flips the status and fires the callback.
    pub async fn on_child_complete(&self, batch_id: &str) -> Result<(), AnalyticsError> {
        let counter_key = Self::counter_key(batch_id);
        let completed = self.store.incr(&counter_key).await?;
        self.store.expire(&counter_key, self.ttl).await?;

        let record_key = keys::batch(batch_id);
        let Some(raw) = self.store.get(&record_key).await? else {
            tracing::warn!(batch_id = %batch_id, "child completed for unknown batch");
            return Ok(());
        };
        let mut job: BatchJob = serde_json::from_str(&raw)?;

        if completed as usize >= job.total_calls && job.status != "completed" {
            job.status = "completed".to_string();
            job.completed_at = Some(Utc::now());
            self.store
                .set_ex(&record_key, &serde_json::to_string(&job)?, self.ttl)
                .await?;

            tracing::info!(batch_id = %batch_id, total = job.total_calls, "batch completed");

            if let Some(url) = &job.callback_url {
                self.fire_callback(url, &job).await;
            }
        }

        Ok(())
    }

    /// At-least-once callback delivery: one retry after a failed attempt.
    async fn fire_callback(&self, url: &str, job: &BatchJob) {
        for attempt in 0..2 {
            match self.http.post(url).json(job).send().await {
                Ok(response) if response.status().is_success() => return,
                Ok(response) => {
                    tracing::warn!(
                        batch_id = %job.batch_id,
                        attempt,
                        status = %response.status(),
                        "batch callback rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(batch_id = %job.batch_id, attempt, error = %e, "batch callback failed");
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    pub async fn status(&self, batch_id: &str) -> Result<Option<BatchStatus>, AnalyticsError> {
        let Some(raw) = self.store.get(&keys::batch(batch_id)).await? else {
            return Ok(None);
        };
        let job: BatchJob = serde_json::from_str(&raw)?;

        let completed = self
            .store
            .get(&Self::counter_key(batch_id))
            .await?
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        Ok(Some(BatchStatus {
            batch_id: job.batch_id,
            status: job.status,
            total_calls: job.total_calls,
            completed_calls: completed.min(job.total_calls),
            progress: if job.total_calls == 0 {
                0.0
            } else {
                completed.min(job.total_calls) as f32 / job.total_calls as f32
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callguard_store::MemoryStore;

    fn coordinator(bound: usize) -> (BatchCoordinator, Arc<TaskQueue>) {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let queue = Arc::new(TaskQueue::new(
            store.clone(),
            bound,
            Duration::from_millis(50),
        ));
        (
            BatchCoordinator::new(store, queue.clone(), Duration::from_secs(86_400)),
            queue,
        )
    }

    #[tokio::test]
    async fn test_batch_children_enqueued_at_priority() {
        let (coordinator, queue) = coordinator(100);

        let job = coordinator
            .submit(
                "user-1",
                vec!["c-1".into(), "c-2".into(), "c-3".into()],
                Priority::High,
                None,
            )
            .await
            .unwrap();

        assert_eq!(job.total_calls, 3);
        assert_eq!(queue.depth(Priority::High).await.unwrap(), 3);

        let task = queue.pop().await.unwrap().unwrap();
        assert_eq!(task.kind, TaskKind::FullAnalysis);
        assert_eq!(task.arg_str("batch_id"), Some(job.batch_id.as_str()));
    }

    #[tokio::test]
    async fn test_completion_accounting() {
        let (coordinator, _queue) = coordinator(100);

        let job = coordinator
            .submit(
                "user-1",
                vec!["c-1".into(), "c-2".into(), "c-3".into()],
                Priority::Normal,
                None,
            )
            .await
            .unwrap();

        coordinator.on_child_complete(&job.batch_id).await.unwrap();
        let status = coordinator.status(&job.batch_id).await.unwrap().unwrap();
        assert_eq!(status.completed_calls, 1);
        assert_eq!(status.status, "queued");

        coordinator.on_child_complete(&job.batch_id).await.unwrap();
        coordinator.on_child_complete(&job.batch_id).await.unwrap();

        let status = coordinator.status(&job.batch_id).await.unwrap().unwrap();
        assert_eq!(status.completed_calls, status.total_calls);
        assert_eq!(status.status, "completed");
        assert!((status.progress - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_partial_enqueue_failure() {
        let (coordinator, _queue) = coordinator(2);

        let job = coordinator
            .submit(
                "user-1",
                vec!["c-1".into(), "c-2".into(), "c-3".into(), "c-4".into()],
                Priority::Normal,
                None,
            )
            .await
            .unwrap();

        assert_eq!(job.total_calls, 2);
        assert_eq!(job.enqueue_failures.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let (coordinator, _queue) = coordinator(10);
        assert!(coordinator
            .submit("user-1", vec![], Priority::Normal, None)
            .await
            .is_err());
    }
}
