//! Dialogue state and turn records
//!
//! `DialogueState` is a plain record owned by the conversation manager; the
//! state tracker is the only writer. The invariant `turn_count ==
//! turns.len()` is maintained by `record()` being the single append path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::emotion::EmotionLabel;
use crate::intent::IntentCategory;
use crate::response::ResponseStrategy;
use crate::stage::CallStage;

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Caller,
    Ai,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Caller => "caller",
            Speaker::Ai => "ai",
        }
    }
}

/// A single speaker turn. Immutable after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<EmotionLabel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ResponseStrategy>,
}

impl TurnRecord {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
            intent: None,
            intent_confidence: None,
            emotion: None,
            emotion_confidence: None,
            latency_ms: None,
            cached: None,
            strategy: None,
        }
    }

    pub fn caller(text: impl Into<String>) -> Self {
        Self::new(Speaker::Caller, text)
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::new(Speaker::Ai, text)
    }

    pub fn with_intent(mut self, intent: IntentCategory, confidence: f32) -> Self {
        self.intent = Some(intent);
        self.intent_confidence = Some(confidence);
        self
    }

    pub fn with_emotion(mut self, emotion: EmotionLabel, confidence: f32) -> Self {
        self.emotion = Some(emotion);
        self.emotion_confidence = Some(confidence);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    pub fn with_strategy(mut self, strategy: ResponseStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Per-call dialogue state. One instance per live call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueState {
    pub call_id: String,
    pub user_id: String,
    /// Salted hash of the caller's number. The raw number never appears
    /// here or in any log line.
    pub caller_fingerprint: String,
    pub stage: CallStage,
    /// Always equal to `turns.len()`.
    pub turn_count: usize,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub turns: Vec<TurnRecord>,
    /// Intent of each caller turn, in order.
    pub intent_history: Vec<IntentCategory>,
    /// Emotion of each caller turn, in order.
    pub emotion_trajectory: Vec<EmotionLabel>,
    pub key_points: Vec<String>,
    /// Caller turns handled while in the current stage.
    pub stage_turns: usize,
    /// Set by `end`; further updates fail with `StateClosed`.
    pub closed: bool,
}

impl DialogueState {
    pub fn new(
        call_id: impl Into<String>,
        user_id: impl Into<String>,
        caller_fingerprint: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            user_id: user_id.into(),
            caller_fingerprint: caller_fingerprint.into(),
            stage: CallStage::Initial,
            turn_count: 0,
            started_at: now,
            last_update: now,
            turns: Vec::new(),
            intent_history: Vec::new(),
            emotion_trajectory: Vec::new(),
            key_points: Vec::new(),
            stage_turns: 0,
            closed: false,
        }
    }

    /// Append a turn. The only mutation path for `turns`, so
    /// `turn_count == turns.len()` holds at every observation point.
    pub fn record(&mut self, turn: TurnRecord) {
        self.turns.push(turn);
        self.turn_count = self.turns.len();
        self.last_update = Utc::now();
    }

    /// Number of caller turns — the exchange count driving the state
    /// machine, strategy overrides and termination turn caps.
    pub fn caller_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.speaker == Speaker::Caller)
            .count()
    }

    pub fn duration_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Last `n` caller intents, most recent last.
    pub fn recent_intents(&self, n: usize) -> &[IntentCategory] {
        let start = self.intent_history.len().saturating_sub(n);
        &self.intent_history[start..]
    }

    /// Last `n` caller emotions, most recent last.
    pub fn recent_emotions(&self, n: usize) -> &[EmotionLabel] {
        let start = self.emotion_trajectory.len().saturating_sub(n);
        &self.emotion_trajectory[start..]
    }

    /// Most recent turns, oldest first, capped at `n`.
    pub fn last_turns(&self, n: usize) -> &[TurnRecord] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    pub fn intent_distribution(&self) -> HashMap<IntentCategory, usize> {
        let mut distribution = HashMap::new();
        for intent in &self.intent_history {
            *distribution.entry(*intent).or_insert(0) += 1;
        }
        distribution
    }
}

/// Start/end/peak of the caller's emotional trajectory.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmotionalSummary {
    pub start: EmotionLabel,
    pub end: EmotionLabel,
    pub peak: EmotionLabel,
}

/// Terminal summary produced by ending a dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSummary {
    pub call_id: String,
    pub user_id: String,
    pub duration_seconds: f64,
    pub total_turns: usize,
    pub caller_turns: usize,
    pub final_stage: CallStage,
    pub termination_reason: String,
    pub intent_distribution: HashMap<IntentCategory, usize>,
    pub key_points: Vec<String>,
    pub emotional_summary: EmotionalSummary,
}

impl CallSummary {
    pub fn from_state(state: &DialogueState, reason: &str, now: DateTime<Utc>) -> Self {
        let trajectory = &state.emotion_trajectory;
        let emotional_summary = EmotionalSummary {
            start: trajectory.first().copied().unwrap_or_default(),
            end: trajectory.last().copied().unwrap_or_default(),
            peak: trajectory
                .iter()
                .copied()
                .max_by_key(|e| e.escalation_rank())
                .unwrap_or_default(),
        };

        Self {
            call_id: state.call_id.clone(),
            user_id: state.user_id.clone(),
            duration_seconds: state.duration_seconds(now),
            total_turns: state.turn_count,
            caller_turns: state.caller_turns(),
            final_stage: state.stage,
            termination_reason: reason.to_string(),
            intent_distribution: state.intent_distribution(),
            key_points: state.key_points.clone(),
            emotional_summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_count_invariant() {
        let mut state = DialogueState::new("call-1", "user-1", "fp");
        assert_eq!(state.turn_count, state.turns.len());

        state.record(TurnRecord::caller("您好"));
        assert_eq!(state.turn_count, 1);
        assert_eq!(state.turn_count, state.turns.len());

        state.record(TurnRecord::ai("你好，请讲。"));
        assert_eq!(state.turn_count, 2);
        assert_eq!(state.turn_count, state.turns.len());
    }

    #[test]
    fn test_caller_turns_counts_only_caller() {
        let mut state = DialogueState::new("call-1", "user-1", "fp");
        state.record(TurnRecord::caller("a"));
        state.record(TurnRecord::ai("b"));
        state.record(TurnRecord::caller("c"));
        assert_eq!(state.caller_turns(), 2);
        assert_eq!(state.turn_count, 3);
    }

    #[test]
    fn test_recent_intents_window() {
        let mut state = DialogueState::new("call-1", "user-1", "fp");
        state.intent_history = vec![
            IntentCategory::SalesCall,
            IntentCategory::LoanOffer,
            IntentCategory::LoanOffer,
            IntentCategory::LoanOffer,
        ];
        assert_eq!(state.recent_intents(3).len(), 3);
        assert!(state
            .recent_intents(3)
            .iter()
            .all(|i| *i == IntentCategory::LoanOffer));
        assert_eq!(state.recent_intents(10).len(), 4);
    }

    #[test]
    fn test_summary_peak_emotion() {
        let mut state = DialogueState::new("call-1", "user-1", "fp");
        state.emotion_trajectory = vec![
            EmotionLabel::Neutral,
            EmotionLabel::Aggressive,
            EmotionLabel::Annoyed,
        ];
        let summary = CallSummary::from_state(&state, "max_turns_exceeded", Utc::now());
        assert_eq!(summary.emotional_summary.peak, EmotionLabel::Aggressive);
        assert_eq!(summary.emotional_summary.end, EmotionLabel::Annoyed);
    }
}
