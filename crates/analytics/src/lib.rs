//! Post-call analysis pipeline
//!
//! Completed calls flow through a prioritized work queue into a bounded
//! worker pool that fans out per-kind analyses (content, effectiveness,
//! summary), caches results per (call, kind), aggregates batch jobs and
//! feeds the learning system.

pub mod batch;
pub mod content;
pub mod effectiveness;
pub mod learning;
pub mod pipeline;
pub mod queue;
pub mod repository;
pub mod summary;
pub mod task;
pub mod worker;

pub use batch::{BatchCoordinator, BatchJob, BatchStatus};
pub use content::{ContentAnalysis, ContentAnalyzer};
pub use effectiveness::{EffectivenessEvaluator, EffectivenessReport};
pub use learning::{BatchLearningReport, LearningInsight, LearningSystem, StrategyStats};
pub use pipeline::AnalysisPipeline;
pub use queue::TaskQueue;
pub use repository::{AnalyticsRepository, CallRecord, InMemoryRepository};
pub use summary::{SummaryGenerator, SummaryReport, SummaryStyle};
pub use task::{Priority, QueuedTask, TaskCompletion, TaskKind, TaskStatus};
pub use worker::WorkerPool;

use thiserror::Error;

/// Pipeline errors. Task handlers return these across the worker boundary
/// instead of panicking; a failed task never takes its worker down.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("queue full: {0}")]
    QueueFull(String),

    #[error("store error: {0}")]
    Store(#[from] callguard_store::StoreError),

    #[error("no call record for {0}")]
    MissingCall(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task failed: {0}")]
    Task(String),
}

impl From<AnalyticsError> for callguard_core::Error {
    fn from(err: AnalyticsError) -> Self {
        match err {
            AnalyticsError::QueueFull(msg) => callguard_core::Error::QueueFull(msg),
            AnalyticsError::MissingCall(msg) => callguard_core::Error::InputInvalid(msg),
            other => callguard_core::Error::Transient(other.to_string()),
        }
    }
}
