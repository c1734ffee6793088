//! Dialogue state tracking
//!
//! One `DialogueState` per live call, held behind a per-call async mutex in
//! a sharded map. Caller turns drive the stage state machine; AI turns only
//! append records. Snapshots are cached under `dialogue_state:{call_id}` so
//! a restarted node can pick up a live call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use callguard_core::{
    CallStage, CallSummary, DialogueState, EmotionLabel, IntentCategory, Speaker, TurnRecord,
};
use callguard_store::{KeyValueStore, TypedCache};

use crate::lexicon;
use crate::EngineError;

/// Classified condition observed at a caller-turn boundary.
///
/// Candidates are evaluated in this order; the first with a defined
/// transition from the current stage wins. An utterance that looks like a
/// question inside a stage with no question rule falls through to the next
/// candidate instead of pinning the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Goodbye,
    Escalation,
    Question,
    ContinuedPersistence,
    Persistence,
    Intent(IntentCategory),
    /// Catch-all for the hang-up-warning stage, which moves to call end on
    /// whatever the caller says next.
    Any,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Goodbye => "goodbye",
            Trigger::Escalation => "escalation",
            Trigger::Question => "question",
            Trigger::ContinuedPersistence => "continued_persistence",
            Trigger::Persistence => "persistence",
            Trigger::Intent(_) => "intent",
            Trigger::Any => "any",
        }
    }
}

/// Tracks dialogue state for every active call.
pub struct DialogueStateTracker {
    calls: DashMap<String, Arc<Mutex<DialogueState>>>,
    snapshots: TypedCache<DialogueState>,
}

impl DialogueStateTracker {
    pub fn new(store: Arc<dyn KeyValueStore>, snapshot_ttl: Duration) -> Self {
        Self {
            calls: DashMap::new(),
            snapshots: TypedCache::new(store, "dialogue_state", snapshot_ttl),
        }
    }

    /// Number of live (unclosed) calls. Derived from the map rather than a
    /// separate counter, so it cannot drift on error paths.
    pub fn active_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|entry| !entry.value().try_lock().map(|s| s.closed).unwrap_or(false))
            .count()
    }

    async fn entry(
        &self,
        call_id: &str,
        user_id: &str,
        caller_fingerprint: &str,
    ) -> Arc<Mutex<DialogueState>> {
        if let Some(existing) = self.calls.get(call_id) {
            return Arc::clone(existing.value());
        }

        // A restarted node recovers a live call from the snapshot cache.
        if let Some(recovered) = self.snapshots.get(call_id).await {
            if !recovered.closed {
                let handle = Arc::new(Mutex::new(recovered));
                return self
                    .calls
                    .entry(call_id.to_string())
                    .or_insert_with(|| {
                        tracing::info!(call_id = %call_id, "recovered dialogue state from cache");
                        handle
                    })
                    .clone();
            }
        }

        self.calls
            .entry(call_id.to_string())
            .or_insert_with(|| {
                tracing::info!(call_id = %call_id, user_id = %user_id, "dialogue started");
                Arc::new(Mutex::new(DialogueState::new(
                    call_id,
                    user_id,
                    caller_fingerprint,
                )))
            })
            .clone()
    }

    /// Get or create the state for a call. Idempotent: repeated calls with
    /// the same id return the same state.
    pub async fn get_or_create(
        &self,
        call_id: &str,
        user_id: &str,
        caller_fingerprint: &str,
    ) -> DialogueState {
        let handle = self.entry(call_id, user_id, caller_fingerprint).await;
        let state = handle.lock().await;
        state.clone()
    }

    /// Read-only copy of the current state.
    pub async fn snapshot(&self, call_id: &str) -> Result<DialogueState, EngineError> {
        let handle = self
            .calls
            .get(call_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| EngineError::UnknownCall(call_id.to_string()))?;
        let state = handle.lock().await;
        Ok(state.clone())
    }

    /// Append a turn and, for caller turns, advance the state machine and
    /// extract at most one key point.
    pub async fn update(
        &self,
        call_id: &str,
        turn: TurnRecord,
    ) -> Result<DialogueState, EngineError> {
        let handle = self
            .calls
            .get(call_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| EngineError::UnknownCall(call_id.to_string()))?;

        let snapshot = {
            let mut state = handle.lock().await;
            if state.closed {
                return Err(EngineError::StateClosed(call_id.to_string()));
            }

            if turn.speaker == Speaker::Caller {
                let intent = turn.intent.unwrap_or_default();
                let emotion = turn.emotion.unwrap_or_default();
                let text = turn.text.clone();

                let transition = Self::evaluate(&state, intent, emotion, &text);

                state.record(turn);
                state.intent_history.push(intent);
                state.emotion_trajectory.push(emotion);

                if let Some(point) = Self::extract_key_point(&text, intent) {
                    state.key_points.push(point);
                }

                match transition {
                    Some((trigger, next)) if next != state.stage => {
                        tracing::info!(
                            call_id = %call_id,
                            from = %state.stage,
                            to = %next,
                            trigger = trigger.as_str(),
                            caller_turns = state.caller_turns(),
                            "stage transition"
                        );
                        metrics::counter!("callguard_stage_transitions_total").increment(1);
                        state.stage = next;
                        state.stage_turns = 0;
                    }
                    _ => {
                        state.stage_turns += 1;
                    }
                }
            } else {
                state.record(turn);
            }

            state.clone()
        };

        self.snapshots.put(call_id, &snapshot).await;
        Ok(snapshot)
    }

    /// End the call. Terminal: the state refuses further updates.
    pub async fn end(&self, call_id: &str, reason: &str) -> Result<CallSummary, EngineError> {
        let handle = self
            .calls
            .get(call_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| EngineError::UnknownCall(call_id.to_string()))?;

        let summary = {
            let mut state = handle.lock().await;
            if state.closed {
                return Err(EngineError::StateClosed(call_id.to_string()));
            }
            state.closed = true;
            state.stage = CallStage::CallEnd;
            CallSummary::from_state(&state, reason, Utc::now())
        };

        self.snapshots.invalidate(call_id).await;
        tracing::info!(
            call_id = %call_id,
            reason = reason,
            turns = summary.total_turns,
            duration_secs = summary.duration_seconds,
            "dialogue ended"
        );
        metrics::counter!("callguard_calls_ended_total").increment(1);
        Ok(summary)
    }

    /// End calls idle past `max_age` and drop their tombstones.
    pub async fn cleanup_stale(&self, max_age: Duration) -> usize {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
        let stale: Vec<String> = {
            let mut stale = Vec::new();
            for entry in self.calls.iter() {
                if let Ok(state) = entry.value().try_lock() {
                    if state.last_update < cutoff {
                        stale.push(entry.key().clone());
                    }
                }
            }
            stale
        };

        let mut cleaned = 0;
        for call_id in stale {
            match self.end(&call_id, "cleanup_timeout").await {
                Ok(_) | Err(EngineError::StateClosed(_)) => {
                    self.calls.remove(&call_id);
                    cleaned += 1;
                }
                Err(e) => {
                    tracing::warn!(call_id = %call_id, error = %e, "stale cleanup failed");
                }
            }
        }
        if cleaned > 0 {
            tracing::info!(cleaned, "stale dialogue cleanup complete");
        }
        cleaned
    }

    /// Evaluate trigger candidates in the fixed priority order and return
    /// the first with a defined transition.
    fn evaluate(
        state: &DialogueState,
        intent: IntentCategory,
        emotion: EmotionLabel,
        text: &str,
    ) -> Option<(Trigger, CallStage)> {
        let candidates = Self::candidates(state, intent, emotion, text);

        if state.stage == CallStage::HangUpWarning {
            let trigger = candidates.first().copied().unwrap_or(Trigger::Any);
            return Some((trigger, CallStage::CallEnd));
        }

        for trigger in candidates {
            if let Some(next) = Self::transition(state.stage, trigger) {
                return Some((trigger, next));
            }
        }
        None
    }

    fn candidates(
        state: &DialogueState,
        intent: IntentCategory,
        emotion: EmotionLabel,
        text: &str,
    ) -> Vec<Trigger> {
        let mut candidates = Vec::with_capacity(6);

        if lexicon::contains_any(text, lexicon::GOODBYE_PHRASES) {
            candidates.push(Trigger::Goodbye);
        }

        if emotion.is_aggressive() || lexicon::contains_any(text, lexicon::AGGRESSION_MARKERS) {
            candidates.push(Trigger::Escalation);
        }

        if lexicon::QUESTION_MARKERS.iter().any(|m| text.contains(m)) {
            candidates.push(Trigger::Question);
        }

        // Same known intent across the last three caller turns (the two
        // recorded plus the current one).
        let repeated = intent.is_known()
            && state.intent_history.len() >= 2
            && state
                .recent_intents(2)
                .iter()
                .all(|previous| *previous == intent);

        if state.stage == CallStage::FirmRejection {
            let pitching = lexicon::contains_any(text, lexicon::PITCH_PHRASES);
            // The repeated-intent flavor needs a turn already absorbed in
            // firm rejection, so a rejection delivered on turn N cannot
            // escalate on turn N+1 without fresh pitch language.
            if pitching || (repeated && state.stage_turns >= 1) {
                candidates.push(Trigger::ContinuedPersistence);
            }
        }

        if repeated {
            candidates.push(Trigger::Persistence);
        }

        if intent.is_known() {
            candidates.push(Trigger::Intent(intent));
        }

        candidates
    }

    /// The transition table. `None` means the (stage, trigger) pair has no
    /// rule and the stage is left unchanged.
    fn transition(stage: CallStage, trigger: Trigger) -> Option<CallStage> {
        use CallStage::*;

        match (stage, trigger) {
            (CallEnd, _) => None,
            (_, Trigger::Goodbye) => Some(CallEnd),
            (Initial, Trigger::Intent(intent)) => CallStage::for_intent(intent),
            (s, Trigger::Persistence) if s.is_handling() || s == PoliteDecline => {
                Some(FirmRejection)
            }
            (s, Trigger::Question) if s.is_handling() => Some(PoliteDecline),
            (FirmRejection, Trigger::ContinuedPersistence) => Some(HangUpWarning),
            (FirmRejection, Trigger::Escalation) => Some(HangUpWarning),
            _ => None,
        }
    }

    /// Scan the turn for a category-specific marker and capture a ≤20-char
    /// window around the first occurrence.
    fn extract_key_point(text: &str, intent: IntentCategory) -> Option<String> {
        let markers = lexicon::KEY_POINT_MARKERS
            .iter()
            .find(|(category, _)| *category == intent)
            .map(|(_, markers)| *markers)?;

        for marker in markers {
            if let Some(byte_idx) = text.find(marker) {
                let chars: Vec<char> = text.chars().collect();
                let char_idx = text[..byte_idx].chars().count();
                let marker_chars = marker.chars().count();
                let start = char_idx.saturating_sub(7);
                let end = (char_idx + marker_chars + 7).min(chars.len());
                let window: String = chars[start..end].iter().collect();
                let trimmed: String = window.chars().take(20).collect();
                return Some(trimmed.trim().to_string());
            }
        }
        None
    }
}
