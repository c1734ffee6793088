//! Application state
//!
//! Explicit dependency bundle handed to the router. Everything is built
//! once at startup and injected; no component reaches into a process
//! global.

use std::sync::Arc;
use std::time::Duration;

use callguard_analytics::{
    AnalysisPipeline, AnalyticsRepository, BatchCoordinator, LearningSystem, SummaryGenerator,
    TaskQueue, WorkerPool,
};
use callguard_config::Settings;
use callguard_engine::{
    ConversationManager, DialogueStateTracker, IntentClassifier, ResponseGenerator,
    SentimentAnalyzer, TerminationDecider,
};
use callguard_llm::{ChatBackend, ChatClient, ChatConfig};
use callguard_store::KeyValueStore;
use metrics_exporter_prometheus::PrometheusHandle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn KeyValueStore>,
    pub manager: Arc<ConversationManager>,
    pub repository: Arc<dyn AnalyticsRepository>,
    pub queue: Arc<TaskQueue>,
    pub pipeline: Arc<AnalysisPipeline>,
    pub learning: Arc<LearningSystem>,
    pub batch: Arc<BatchCoordinator>,
    pub workers: Arc<WorkerPool>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the full component graph from settings, a store backend and a
    /// storage adapter.
    pub fn build(
        settings: Settings,
        store: Arc<dyn KeyValueStore>,
        repository: Arc<dyn AnalyticsRepository>,
    ) -> anyhow::Result<Self> {
        let backend: Option<Arc<dyn ChatBackend>> = if settings.llm.enabled {
            let config = ChatConfig {
                endpoint: settings.llm.endpoint.clone(),
                api_key: settings.llm.api_key.clone(),
                model: settings.llm.model.clone(),
                max_tokens: settings.llm.max_tokens,
                temperature: settings.llm.temperature,
                top_p: settings.llm.top_p,
                timeout: Duration::from_millis(settings.llm.timeout_ms),
                max_retries: settings.llm.max_retries,
                initial_backoff: Duration::from_millis(settings.llm.initial_backoff_ms),
            };
            Some(Arc::new(ChatClient::new(config)?))
        } else {
            tracing::info!("LLM disabled, responses come from the template bank");
            None
        };

        let tracker = Arc::new(DialogueStateTracker::new(
            store.clone(),
            Duration::from_secs(settings.cache.dialogue_state_ttl_secs),
        ));
        let classifier = Arc::new(IntentClassifier::new(
            store.clone(),
            Duration::from_secs(settings.cache.intent_ttl_secs),
        ));
        let analyzer = Arc::new(SentimentAnalyzer::new(
            store.clone(),
            Duration::from_secs(settings.cache.sentiment_ttl_secs),
            &settings.text_analytics,
        ));
        let generator = Arc::new(ResponseGenerator::new(
            backend.clone(),
            store.clone(),
            Duration::from_secs(settings.cache.response_ttl_secs),
            settings.engine.response_cache_confidence,
        ));
        let decider = Arc::new(TerminationDecider::new(&settings.engine));

        let manager = Arc::new(ConversationManager::new(
            tracker,
            classifier,
            analyzer,
            generator,
            decider,
            Duration::from_millis(settings.engine.turn_budget_ms),
        ));

        let queue = Arc::new(TaskQueue::new(
            store.clone(),
            settings.pipeline.queue_bound,
            Duration::from_secs(settings.pipeline.pop_timeout_secs),
        ));
        let batch = Arc::new(BatchCoordinator::new(
            store.clone(),
            queue.clone(),
            Duration::from_secs(settings.cache.batch_ttl_secs),
        ));
        let learning = Arc::new(LearningSystem::new());
        let pipeline = Arc::new(AnalysisPipeline::new(
            store.clone(),
            Duration::from_secs(settings.cache.analysis_ttl_secs),
            repository.clone(),
            SummaryGenerator::new(backend),
            learning.clone(),
            batch.clone(),
        ));
        let workers = Arc::new(WorkerPool::new(
            queue.clone(),
            pipeline.clone(),
            &settings.pipeline,
        ));

        Ok(Self {
            settings: Arc::new(settings),
            store,
            manager,
            repository,
            queue,
            pipeline,
            learning,
            batch,
            workers,
            metrics_handle: None,
        })
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics_handle = handle;
        self
    }
}
