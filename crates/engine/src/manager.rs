//! Per-turn conversation orchestration
//!
//! The only component exported to external callers. Each turn runs intent
//! classification and sentiment analysis concurrently, advances the
//! dialogue state, selects a strategy, generates the reply and checks
//! termination. Turns of the same call serialize on a per-call lock;
//! different calls proceed in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use callguard_core::{
    CallStage, CallSummary, EmotionLabel, IntentCategory, IntentResult, SpamCategory, SpamProfile,
    TurnRecord, UserProfile,
};

use crate::intent::IntentClassifier;
use crate::responder::ResponseGenerator;
use crate::sentiment::SentimentAnalyzer;
use crate::strategy::select_strategy;
use crate::termination::{TerminationDecider, TerminationDecision};
use crate::tracker::DialogueStateTracker;
use crate::EngineError;

/// One caller turn to process.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    pub call_id: String,
    pub user_id: String,
    pub input_text: String,
    /// Salted hash of the caller number, computed at the boundary. The raw
    /// number never reaches the engine.
    #[serde(default)]
    pub caller_fingerprint: Option<String>,
    #[serde(default)]
    pub user_profile: Option<UserProfile>,
    #[serde(default)]
    pub spam_profile: Option<SpamProfile>,
}

/// Result of one processed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub response: String,
    pub next_state: CallStage,
    pub should_terminate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
    pub intent: IntentCategory,
    pub confidence: f32,
    pub emotional_tone: EmotionLabel,
    /// Caller turns so far (the exchange count).
    pub turn_count: usize,
    pub processing_time_ms: u64,
}

/// Typed bundle of the dialogue core's collaborators.
pub struct ConversationManager {
    tracker: Arc<DialogueStateTracker>,
    classifier: Arc<IntentClassifier>,
    analyzer: Arc<SentimentAnalyzer>,
    generator: Arc<ResponseGenerator>,
    decider: Arc<TerminationDecider>,
    turn_budget: Duration,
    turn_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationManager {
    pub fn new(
        tracker: Arc<DialogueStateTracker>,
        classifier: Arc<IntentClassifier>,
        analyzer: Arc<SentimentAnalyzer>,
        generator: Arc<ResponseGenerator>,
        decider: Arc<TerminationDecider>,
        turn_budget: Duration,
    ) -> Self {
        Self {
            tracker,
            classifier,
            analyzer,
            generator,
            decider,
            turn_budget,
            turn_locks: DashMap::new(),
        }
    }

    pub fn tracker(&self) -> &Arc<DialogueStateTracker> {
        &self.tracker
    }

    pub fn classifier(&self) -> &Arc<IntentClassifier> {
        &self.classifier
    }

    pub fn decider(&self) -> &Arc<TerminationDecider> {
        &self.decider
    }

    fn turn_lock(&self, call_id: &str) -> Arc<Mutex<()>> {
        self.turn_locks
            .entry(call_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Process one caller turn end to end.
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnOutcome, EngineError> {
        if request.call_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("call_id is required".into()));
        }
        if request.user_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("user_id is required".into()));
        }

        let start = Instant::now();
        let lock = self.turn_lock(&request.call_id);
        let _turn_guard = lock.lock().await;

        let fingerprint = request.caller_fingerprint.as_deref().unwrap_or("unknown");
        let state = self
            .tracker
            .get_or_create(&request.call_id, &request.user_id, fingerprint)
            .await;

        // Intent and sentiment run concurrently on the caller text.
        let (intent_result, analysis) = tokio::join!(
            self.classifier.classify(
                &request.input_text,
                Some(&state),
                request.spam_profile.as_ref(),
            ),
            self.analyzer.analyze(&request.input_text),
        );

        let caller_turn = TurnRecord::caller(request.input_text.clone())
            .with_intent(intent_result.intent, intent_result.confidence)
            .with_emotion(analysis.emotion.primary, analysis.emotion.confidence);
        let state = self.tracker.update(&request.call_id, caller_turn).await?;

        let profile = request
            .user_profile
            .clone()
            .unwrap_or_else(|| UserProfile::new(request.user_id.as_str()));
        let spam_category = request
            .spam_profile
            .as_ref()
            .map(|p| p.category)
            .unwrap_or_else(|| SpamCategory::from_intent(intent_result.intent));

        let strategy = select_strategy(
            state.stage,
            profile.personality,
            state.caller_turns(),
            &intent_result.emotional_tone,
        );

        let response = self
            .generator
            .generate(strategy, &state, &profile, &intent_result, spam_category)
            .await;

        let ai_turn = TurnRecord::ai(response.text.clone())
            .with_emotion(response.emotional_tone, response.confidence)
            .with_latency(response.generation_time_ms)
            .with_cached(response.cached)
            .with_strategy(strategy);
        let state = self.tracker.update(&request.call_id, ai_turn).await?;

        let decision = self.decider.decide(&state, &response);

        let outcome = self.finish_turn(&request.call_id, state.caller_turns(), &intent_result, response, decision, state.stage);

        let elapsed = start.elapsed();
        metrics::histogram!("callguard_turn_latency_ms").record(elapsed.as_millis() as f64);
        if elapsed > self.turn_budget {
            tracing::warn!(
                call_id = %request.call_id,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = self.turn_budget.as_millis() as u64,
                "turn exceeded latency budget"
            );
        }

        Ok(TurnOutcome {
            processing_time_ms: elapsed.as_millis() as u64,
            ..outcome
        })
    }

    fn finish_turn(
        &self,
        call_id: &str,
        caller_turns: usize,
        intent_result: &IntentResult,
        response: callguard_core::AiResponse,
        decision: TerminationDecision,
        stage: CallStage,
    ) -> TurnOutcome {
        let (response_text, should_terminate, termination_reason) = if decision.terminate {
            let reason = decision
                .reason
                .clone()
                .unwrap_or_else(|| "explicit_termination".to_string());

            // Ending the dialogue is scheduled off the reply path.
            let tracker = self.tracker.clone();
            let call_id = call_id.to_string();
            let end_reason = reason.clone();
            tokio::spawn(async move {
                match tracker.end(&call_id, &end_reason).await {
                    Ok(_) => {}
                    Err(EngineError::StateClosed(_)) => {}
                    Err(e) => {
                        tracing::warn!(call_id = %call_id, error = %e, "deferred end failed")
                    }
                }
            });

            let final_text = decision
                .final_response
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or(response.text);
            (final_text, true, Some(reason))
        } else {
            (response.text, false, None)
        };

        TurnOutcome {
            response: response_text,
            next_state: if should_terminate {
                CallStage::CallEnd
            } else {
                stage
            },
            should_terminate,
            termination_reason,
            intent: intent_result.intent,
            confidence: intent_result.confidence,
            emotional_tone: response.emotional_tone,
            turn_count: caller_turns,
            processing_time_ms: 0,
        }
    }

    /// Summary of a call, live or ended.
    pub async fn conversation_summary(&self, call_id: &str) -> Result<CallSummary, EngineError> {
        let state = self.tracker.snapshot(call_id).await?;
        Ok(CallSummary::from_state(
            &state,
            if state.closed { "ended" } else { "ongoing" },
            chrono::Utc::now(),
        ))
    }

    /// Explicitly end a call (boundary use).
    pub async fn end_call(&self, call_id: &str, reason: &str) -> Result<CallSummary, EngineError> {
        let summary = self.tracker.end(call_id, reason).await?;
        self.turn_locks.remove(call_id);
        Ok(summary)
    }
}
