//! Analysis pipeline
//!
//! Routes queued tasks to their handlers with an exhaustive match over the
//! task kind. Results are cached per (call, kind) with read-through
//! semantics and an at-most-once execution guard; `full_analysis` fans out
//! content and effectiveness in parallel and runs the summary strictly
//! after both. A failed sub-analysis is carried as a per-kind error field
//! and never aborts the rest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use callguard_store::{KeyValueStore, TypedCache};

use crate::batch::BatchCoordinator;
use crate::content::ContentAnalyzer;
use crate::effectiveness::EffectivenessEvaluator;
use crate::learning::LearningSystem;
use crate::repository::{AnalyticsRepository, CallRecord};
use crate::summary::{SummaryGenerator, SummaryStyle};
use crate::task::{QueuedTask, TaskKind};
use crate::AnalyticsError;

/// Post-call analysis pipeline.
pub struct AnalysisPipeline {
    store: Arc<dyn KeyValueStore>,
    cache: TypedCache<Value>,
    cache_ttl: Duration,
    repository: Arc<dyn AnalyticsRepository>,
    content: ContentAnalyzer,
    effectiveness: EffectivenessEvaluator,
    summary: SummaryGenerator,
    learning: Arc<LearningSystem>,
    batch: Arc<BatchCoordinator>,
}

impl AnalysisPipeline {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        cache_ttl: Duration,
        repository: Arc<dyn AnalyticsRepository>,
        summary: SummaryGenerator,
        learning: Arc<LearningSystem>,
        batch: Arc<BatchCoordinator>,
    ) -> Self {
        Self {
            cache: TypedCache::new(store.clone(), "analysis", cache_ttl),
            store,
            cache_ttl,
            repository,
            content: ContentAnalyzer::new(),
            effectiveness: EffectivenessEvaluator::new(),
            summary,
            learning,
            batch,
        }
    }

    pub fn batch_coordinator(&self) -> &Arc<BatchCoordinator> {
        &self.batch
    }

    pub fn learning(&self) -> &Arc<LearningSystem> {
        &self.learning
    }

    /// Route one task. The match is exhaustive: a new task kind fails to
    /// compile until it has a handler.
    pub async fn handle(&self, task: &QueuedTask) -> Result<Value, AnalyticsError> {
        match task.kind {
            TaskKind::Transcription => self.run_transcription(task).await,
            TaskKind::ContentAnalysis => self.run_content(task).await,
            TaskKind::Effectiveness => self.run_effectiveness(task).await,
            TaskKind::Summary => self.run_summary(task).await,
            TaskKind::FullAnalysis => self.run_full(task).await,
        }
    }

    fn cache_fingerprint(call_id: &str, kind: TaskKind) -> String {
        format!("{}:{}", call_id, kind.as_str())
    }

    async fn record_for(&self, call_id: &str) -> Result<CallRecord, AnalyticsError> {
        self.repository
            .call_record(call_id)
            .await?
            .ok_or_else(|| AnalyticsError::MissingCall(call_id.to_string()))
    }

    /// Read-through lookup plus at-most-once execution guard. Returns the
    /// cached value if present; otherwise marks the fingerprint claimed.
    async fn check_cached(&self, call_id: &str, kind: TaskKind) -> Option<Value> {
        let fingerprint = Self::cache_fingerprint(call_id, kind);
        if let Some(cached) = self.cache.get(&fingerprint).await {
            metrics::counter!("callguard_analysis_cache_hits_total").increment(1);
            return Some(cached);
        }

        let dedup_key = callguard_store::keys::analysis_dedup(call_id, kind.as_str());
        match self.store.incr(&dedup_key).await {
            Ok(claims) => {
                let _ = self.store.expire(&dedup_key, self.cache_ttl).await;
                if claims > 1 {
                    tracing::debug!(call_id = %call_id, kind = %kind, claims, "duplicate analysis claim");
                    // Another worker may have finished between the cache
                    // read and the claim.
                    if let Some(cached) = self.cache.get(&fingerprint).await {
                        return Some(cached);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(call_id = %call_id, error = %e, "dedup guard unavailable");
            }
        }
        None
    }

    async fn finish(
        &self,
        call_id: &str,
        kind: TaskKind,
        payload: Value,
    ) -> Result<Value, AnalyticsError> {
        self.cache
            .put(&Self::cache_fingerprint(call_id, kind), &payload)
            .await;
        self.repository
            .save_analysis(call_id, kind.as_str(), payload.clone())
            .await?;
        Ok(payload)
    }

    async fn run_transcription(&self, task: &QueuedTask) -> Result<Value, AnalyticsError> {
        if let Some(cached) = self.check_cached(&task.call_id, TaskKind::Transcription).await {
            return Ok(cached);
        }
        let record = self.record_for(&task.call_id).await?;
        let payload = json!({
            "full_transcript": record.transcript(),
            "turn_count": record.state.turn_count,
            "caller_turns": record.state.caller_turns(),
        });
        self.finish(&task.call_id, TaskKind::Transcription, payload).await
    }

    async fn run_content(&self, task: &QueuedTask) -> Result<Value, AnalyticsError> {
        if let Some(cached) = self
            .check_cached(&task.call_id, TaskKind::ContentAnalysis)
            .await
        {
            return Ok(cached);
        }
        let record = self.record_for(&task.call_id).await?;
        let payload = serde_json::to_value(self.content.analyze(&record))?;
        self.finish(&task.call_id, TaskKind::ContentAnalysis, payload)
            .await
    }

    async fn run_effectiveness(&self, task: &QueuedTask) -> Result<Value, AnalyticsError> {
        if let Some(cached) = self
            .check_cached(&task.call_id, TaskKind::Effectiveness)
            .await
        {
            return Ok(cached);
        }
        let record = self.record_for(&task.call_id).await?;
        let profile = self.repository.user_profile(&record.state.user_id).await?;
        let report = self.effectiveness.evaluate(&record, profile.as_ref()).await;
        let payload = serde_json::to_value(report)?;
        self.finish(&task.call_id, TaskKind::Effectiveness, payload)
            .await
    }

    async fn run_summary(&self, task: &QueuedTask) -> Result<Value, AnalyticsError> {
        if let Some(cached) = self.check_cached(&task.call_id, TaskKind::Summary).await {
            return Ok(cached);
        }
        let record = self.record_for(&task.call_id).await?;

        // The summary consumes whatever sub-analyses already exist.
        let content = self
            .cache
            .get(&Self::cache_fingerprint(&task.call_id, TaskKind::ContentAnalysis))
            .await;
        let effectiveness = self
            .cache
            .get(&Self::cache_fingerprint(&task.call_id, TaskKind::Effectiveness))
            .await;
        let analyses = json!({
            "content": content,
            "effectiveness": effectiveness,
        });

        let style = task
            .arg_str("style")
            .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
            .unwrap_or(SummaryStyle::Comprehensive);

        let report = self.summary.generate(&record, &analyses, style).await;
        let payload = serde_json::to_value(report)?;
        self.finish(&task.call_id, TaskKind::Summary, payload).await
    }

    /// Full fan-out: content and effectiveness in parallel, then the
    /// summary over their outputs. Per-kind failures become error fields.
    async fn run_full(&self, task: &QueuedTask) -> Result<Value, AnalyticsError> {
        let call_id = &task.call_id;

        // A run that finds everything cached returns immediately.
        let kinds = [
            TaskKind::Transcription,
            TaskKind::ContentAnalysis,
            TaskKind::Effectiveness,
            TaskKind::Summary,
        ];
        let mut cached = Vec::with_capacity(kinds.len());
        for kind in kinds {
            cached.push(
                self.cache
                    .get(&Self::cache_fingerprint(call_id, kind))
                    .await,
            );
        }
        if cached.iter().all(|c| c.is_some()) {
            tracing::debug!(call_id = %call_id, "full analysis served from cache");
            let mut iter = cached.into_iter().flatten();
            return Ok(json!({
                "transcription": iter.next(),
                "content": iter.next(),
                "effectiveness": iter.next(),
                "summary": iter.next(),
            }));
        }

        let record = self.record_for(call_id).await?;

        let transcription = self
            .run_transcription(task)
            .await
            .unwrap_or_else(|e| json!({ "error": e.to_string() }));

        let (content, effectiveness) =
            tokio::join!(self.run_content(task), self.run_effectiveness(task));
        let content = content.unwrap_or_else(|e| json!({ "error": e.to_string() }));
        let effectiveness = effectiveness.unwrap_or_else(|e| json!({ "error": e.to_string() }));

        let summary = self
            .run_summary(task)
            .await
            .unwrap_or_else(|e| json!({ "error": e.to_string() }));

        // Learning consumes the evaluator's score when it exists, or the
        // compact proxy otherwise.
        let score = effectiveness
            .get("overall_score")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or_else(|| LearningSystem::proxy_effectiveness(&record));
        self.learning.learn_from_call(&record, score);

        self.update_spam_profile(&record).await;

        Ok(json!({
            "transcription": transcription,
            "content": content,
            "effectiveness": effectiveness,
            "summary": summary,
        }))
    }

    /// Fold this call into the caller's spam profile, read back by the
    /// intent classifier as a prior on future calls.
    async fn update_spam_profile(&self, record: &CallRecord) {
        use callguard_core::{SpamCategory, SpamProfile};

        let fingerprint = record.state.caller_fingerprint.as_str();
        if fingerprint.is_empty() || fingerprint == "unknown" {
            return;
        }

        let key = callguard_store::keys::spam_profile(fingerprint);
        let mut profile = match self.store.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw)
                .unwrap_or_else(|_| SpamProfile::new(fingerprint, SpamCategory::Unknown)),
            _ => SpamProfile::new(fingerprint, SpamCategory::Unknown),
        };

        let dominant = record
            .state
            .intent_distribution()
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(intent, _)| SpamCategory::from_intent(intent))
            .unwrap_or(SpamCategory::Unknown);
        if dominant != SpamCategory::Unknown {
            profile.category = dominant;
        }

        profile.report_count += 1;
        let blocked = matches!(
            record.outcome.as_str(),
            "successful_termination" | "caller_accepted"
        );
        if blocked {
            profile.successful_blocks += 1;
        } else {
            profile.bypass_attempts += 1;
        }
        profile.risk_score = (0.8 * profile.risk_score + 0.2).min(1.0);
        profile.confidence = (profile.confidence + 0.05).min(0.95);
        profile.last_activity = chrono::Utc::now();

        match serde_json::to_string(&profile) {
            Ok(raw) => {
                if let Err(e) = self.store.set(&key, &raw).await {
                    tracing::warn!(error = %e, "spam profile write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "spam profile serialize failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskQueue;
    use crate::repository::{fixtures, InMemoryRepository};
    use crate::task::Priority;
    use callguard_core::CallStage;
    use callguard_store::{KeyValueStore as _, MemoryStore};

    fn pipeline() -> (AnalysisPipeline, Arc<InMemoryRepository>, Arc<MemoryStore>) {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let queue = Arc::new(TaskQueue::new(
            store.clone(),
            100,
            Duration::from_millis(50),
        ));
        let repository = Arc::new(InMemoryRepository::new());
        let batch = Arc::new(BatchCoordinator::new(
            store.clone(),
            queue,
            Duration::from_secs(86_400),
        ));
        (
            AnalysisPipeline::new(
                store.clone(),
                Duration::from_secs(3600),
                repository.clone(),
                SummaryGenerator::new(None),
                Arc::new(LearningSystem::new()),
                batch,
            ),
            repository,
            store,
        )
    }

    #[tokio::test]
    async fn test_full_analysis_produces_all_kinds() {
        let (pipeline, repository, _store) = pipeline();
        repository
            .save_call_record(fixtures::loan_call("c-1", 3, CallStage::CallEnd))
            .await
            .unwrap();

        let task = QueuedTask::new("c-1", TaskKind::FullAnalysis, Priority::Normal);
        let result = pipeline.handle(&task).await.unwrap();

        assert!(result.get("transcription").is_some());
        assert!(result["content"].get("error").is_none());
        assert!(result["effectiveness"]["overall_score"].is_number());
        assert!(result["summary"]["text"].is_string());

        // Every successful kind was persisted as an analysis row.
        let kinds: Vec<String> = repository
            .analyses()
            .iter()
            .map(|row| row.analysis_type.clone())
            .collect();
        assert!(kinds.contains(&"content_analysis".to_string()));
        assert!(kinds.contains(&"effectiveness".to_string()));
        assert!(kinds.contains(&"summary".to_string()));
    }

    #[tokio::test]
    async fn test_missing_call_carries_error_fields() {
        let (pipeline, _repository, _store) = pipeline();
        let task = QueuedTask::new("ghost", TaskKind::FullAnalysis, Priority::Normal);
        let err = pipeline.handle(&task).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::MissingCall(_)));
    }

    #[tokio::test]
    async fn test_single_kind_cached_read_through() {
        let (pipeline, repository, _store) = pipeline();
        repository
            .save_call_record(fixtures::loan_call("c-2", 2, CallStage::CallEnd))
            .await
            .unwrap();

        let task = QueuedTask::new("c-2", TaskKind::ContentAnalysis, Priority::Normal);
        let first = pipeline.handle(&task).await.unwrap();
        let second = pipeline.handle(&task).await.unwrap();
        assert_eq!(first, second);

        // The second run came from cache: only one analysis row stored.
        let rows = repository
            .analyses()
            .iter()
            .filter(|r| r.analysis_type == "content_analysis")
            .count();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_full_analysis_cached_second_run() {
        let (pipeline, repository, _store) = pipeline();
        repository
            .save_call_record(fixtures::loan_call("c-3", 2, CallStage::CallEnd))
            .await
            .unwrap();

        let task = QueuedTask::new("c-3", TaskKind::FullAnalysis, Priority::Normal);
        pipeline.handle(&task).await.unwrap();
        let rows_after_first = repository.analyses().len();

        pipeline.handle(&task).await.unwrap();
        assert_eq!(repository.analyses().len(), rows_after_first);
    }

    #[tokio::test]
    async fn test_spam_profile_written_back() {
        let (pipeline, repository, store) = pipeline();
        repository
            .save_call_record(fixtures::loan_call("c-5", 3, CallStage::CallEnd))
            .await
            .unwrap();

        let task = QueuedTask::new("c-5", TaskKind::FullAnalysis, Priority::Normal);
        pipeline.handle(&task).await.unwrap();

        let raw = store
            .get(&callguard_store::keys::spam_profile("fp"))
            .await
            .unwrap()
            .expect("spam profile stored");
        let profile: callguard_core::SpamProfile = serde_json::from_str(&raw).unwrap();
        assert_eq!(profile.category, callguard_core::SpamCategory::Loan);
        assert_eq!(profile.report_count, 1);
        assert_eq!(profile.successful_blocks, 1);
    }

    #[tokio::test]
    async fn test_learning_updated_by_full_analysis() {
        let (pipeline, repository, _store) = pipeline();
        repository
            .save_call_record(fixtures::loan_call("c-4", 3, CallStage::CallEnd))
            .await
            .unwrap();

        let task = QueuedTask::new("c-4", TaskKind::FullAnalysis, Priority::Normal);
        pipeline.handle(&task).await.unwrap();

        let stats = pipeline.learning().strategy_performance();
        assert!(stats.contains_key("explain_not_interested"));
    }
}
