//! Task records for the post-call queue

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of post-call work. A tagged union: an unknown kind cannot be
/// constructed, and the pipeline router matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Transcription,
    ContentAnalysis,
    Effectiveness,
    Summary,
    FullAnalysis,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Transcription => "transcription",
            TaskKind::ContentAnalysis => "content_analysis",
            TaskKind::Effectiveness => "effectiveness",
            TaskKind::Summary => "summary",
            TaskKind::FullAnalysis => "full_analysis",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Queue priority. High preempts normal preempts low at dequeue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Dequeue scan order.
    pub const ORDERED: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

/// One queued unit of post-call work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: String,
    pub call_id: String,
    pub kind: TaskKind,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
}

impl QueuedTask {
    pub fn new(call_id: impl Into<String>, kind: TaskKind, priority: Priority) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            call_id: call_id.into(),
            kind,
            priority,
            created_at: Utc::now(),
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// Terminal state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// Published record of a finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: String,
    pub call_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl TaskCompletion {
    pub fn completed(task: &QueuedTask, result: serde_json::Value) -> Self {
        Self {
            task_id: task.task_id.clone(),
            call_id: task.call_id.clone(),
            kind: task.kind,
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(task: &QueuedTask, error: impl Into<String>) -> Self {
        Self {
            task_id: task.task_id.clone(),
            call_id: task.call_id.clone(),
            kind: task.kind,
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_round_trips() {
        let task = QueuedTask::new("call-1", TaskKind::FullAnalysis, Priority::High)
            .with_arg("batch_id", serde_json::json!("b-1"));
        let raw = serde_json::to_string(&task).unwrap();
        let parsed: QueuedTask = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.call_id, "call-1");
        assert_eq!(parsed.kind, TaskKind::FullAnalysis);
        assert_eq!(parsed.arg_str("batch_id"), Some("b-1"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskKind::ContentAnalysis).unwrap(),
            "\"content_analysis\""
        );
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(
            Priority::ORDERED,
            [Priority::High, Priority::Normal, Priority::Low]
        );
    }
}
