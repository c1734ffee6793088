//! Effectiveness evaluation
//!
//! Six sub-evaluations over a completed call, each scoring [0, 1] from the
//! dialogue state, its turn records and the user profile snapshot alone —
//! no external calls. The overall score is a fixed weighted sum.

use serde::{Deserialize, Serialize};

use callguard_core::{CallStage, EmotionLabel, Speaker, TurnRecord, UserProfile};

use crate::repository::CallRecord;

const WEIGHT_RESPONSE_QUALITY: f32 = 0.25;
const WEIGHT_CONVERSATION_FLOW: f32 = 0.20;
const WEIGHT_CALLER_SATISFACTION: f32 = 0.20;
const WEIGHT_TERMINATION: f32 = 0.15;
const WEIGHT_LATENCY: f32 = 0.10;
const WEIGHT_CONTEXT: f32 = 0.10;

/// Per-dimension and overall effectiveness scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivenessReport {
    pub call_id: String,
    pub response_quality: f32,
    pub conversation_flow: f32,
    pub caller_satisfaction: f32,
    pub termination_appropriateness: f32,
    pub response_latency: f32,
    pub contextual_awareness: f32,
    pub overall_score: f32,
}

/// Effectiveness evaluator.
#[derive(Default)]
pub struct EffectivenessEvaluator;

impl EffectivenessEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one completed call. The six dimensions run concurrently.
    pub async fn evaluate(
        &self,
        record: &CallRecord,
        profile: Option<&UserProfile>,
    ) -> EffectivenessReport {
        let (quality, flow, satisfaction, termination, latency, context) = tokio::join!(
            Self::response_quality(record),
            Self::conversation_flow(record),
            Self::caller_satisfaction(record),
            Self::termination_appropriateness(record),
            Self::response_latency(record),
            Self::contextual_awareness(record, profile),
        );

        let overall = (quality * WEIGHT_RESPONSE_QUALITY
            + flow * WEIGHT_CONVERSATION_FLOW
            + satisfaction * WEIGHT_CALLER_SATISFACTION
            + termination * WEIGHT_TERMINATION
            + latency * WEIGHT_LATENCY
            + context * WEIGHT_CONTEXT)
            .clamp(0.0, 1.0);

        EffectivenessReport {
            call_id: record.call_id().to_string(),
            response_quality: quality,
            conversation_flow: flow,
            caller_satisfaction: satisfaction,
            termination_appropriateness: termination,
            response_latency: latency,
            contextual_awareness: context,
            overall_score: overall,
        }
    }

    fn ai_turns(record: &CallRecord) -> Vec<&TurnRecord> {
        record
            .state
            .turns
            .iter()
            .filter(|t| t.speaker == Speaker::Ai)
            .collect()
    }

    /// Relevance, naturalness and repetition of the AI's replies.
    async fn response_quality(record: &CallRecord) -> f32 {
        let turns = Self::ai_turns(record);
        if turns.is_empty() {
            return 0.0;
        }

        let mut scores = Vec::with_capacity(turns.len());
        for turn in &turns {
            let chars = turn.text.chars().count();
            let naturalness = if chars < 4 {
                0.3
            } else if chars > 100 {
                0.7
            } else {
                0.8
            };
            let confidence = turn.emotion_confidence.unwrap_or(0.5);
            scores.push(0.4 * confidence + 0.3 * naturalness + 0.3 * Self::coherence(&turns));
        }
        scores.iter().sum::<f32>() / scores.len() as f32
    }

    /// Penalizes the AI repeating itself verbatim.
    fn coherence(turns: &[&TurnRecord]) -> f32 {
        if turns.len() < 2 {
            return 0.7;
        }
        let mut texts: Vec<&str> = turns.iter().map(|t| t.text.as_str()).collect();
        texts.sort_unstable();
        texts.dedup();
        let unique_ratio = texts.len() as f32 / turns.len() as f32;
        if unique_ratio < 0.7 {
            0.4
        } else {
            0.8
        }
    }

    /// Alternation and forward stage motion.
    async fn conversation_flow(record: &CallRecord) -> f32 {
        let turns = &record.state.turns;
        if turns.len() < 2 {
            return 0.5;
        }

        // Every caller turn should be answered.
        let mut answered = 0usize;
        let mut caller_count = 0usize;
        for pair in turns.windows(2) {
            if pair[0].speaker == Speaker::Caller {
                caller_count += 1;
                if pair[1].speaker == Speaker::Ai {
                    answered += 1;
                }
            }
        }
        if turns.last().map(|t| t.speaker) == Some(Speaker::Caller) {
            caller_count += 1;
        }
        let answered_ratio = if caller_count == 0 {
            1.0
        } else {
            answered as f32 / caller_count as f32
        };

        let progress = record.state.stage.progress_score();
        0.6 * answered_ratio + 0.4 * progress
    }

    /// Caller's emotional arc: hostility and sustained frustration lower it.
    async fn caller_satisfaction(record: &CallRecord) -> f32 {
        let trajectory = &record.state.emotion_trajectory;
        if trajectory.is_empty() {
            return 0.5;
        }

        let per_emotion: f32 = trajectory
            .iter()
            .map(|e| match e {
                EmotionLabel::Friendly | EmotionLabel::Joy => 0.9,
                EmotionLabel::Polite | EmotionLabel::Patient => 0.8,
                EmotionLabel::Neutral => 0.7,
                EmotionLabel::Confused => 0.5,
                EmotionLabel::Firm | EmotionLabel::Dismissive => 0.4,
                EmotionLabel::Annoyed | EmotionLabel::Sadness | EmotionLabel::Fear => 0.3,
                EmotionLabel::Frustrated | EmotionLabel::Disgust | EmotionLabel::Surprise => 0.2,
                EmotionLabel::Aggressive | EmotionLabel::Anger => 0.1,
            })
            .sum::<f32>()
            / trajectory.len() as f32;

        // The AI stays polite regardless of the caller.
        let ai_hostile = Self::ai_turns(record)
            .iter()
            .any(|t| t.emotion.is_some_and(|e| e.is_aggressive()));
        let politeness = if ai_hostile { 0.3 } else { 1.0 };

        0.4 * per_emotion + 0.3 * politeness + 0.3 * per_emotion.max(0.3)
    }

    /// Did the call end when and how it should have.
    async fn termination_appropriateness(record: &CallRecord) -> f32 {
        let turns = record.state.caller_turns();
        let timing = if turns <= 5 {
            1.0
        } else if turns <= 8 {
            0.7
        } else {
            0.3
        };

        let method = match record.termination_reason.as_deref() {
            Some("explicit_termination") | Some("caller_hangup") => 1.0,
            Some("max_turns_exceeded") | Some("max_duration_exceeded") => 0.6,
            Some(_) => 0.8,
            None => 0.4,
        };

        let outcome = if record.state.stage == CallStage::CallEnd {
            1.0
        } else {
            0.5
        };

        0.4 * timing + 0.3 * method + 0.3 * outcome
    }

    /// Average and worst-case reply latency against the turn budget.
    async fn response_latency(record: &CallRecord) -> f32 {
        let latencies: Vec<u64> = Self::ai_turns(record)
            .iter()
            .filter_map(|t| t.latency_ms)
            .collect();
        if latencies.is_empty() {
            return 0.5;
        }

        let avg = latencies.iter().sum::<u64>() as f32 / latencies.len() as f32;
        let avg_score = (1.0 - avg / 1000.0).clamp(0.0, 1.0);

        let max = *latencies.iter().max().unwrap_or(&0) as f32;
        let consistency = (1.0 - max / 3000.0).clamp(0.0, 1.0);

        0.6 * avg_score + 0.4 * consistency
    }

    /// Profile usage and adaptation to the conversation.
    async fn contextual_awareness(record: &CallRecord, profile: Option<&UserProfile>) -> f32 {
        let profile_score: f32 = if profile.is_some() { 0.9 } else { 0.5 };

        // Strategy variety signals adaptation rather than a fixed script.
        let strategies = record.strategies_used();
        let adaptation = if strategies.len() < 2 {
            0.6
        } else {
            let mut unique = strategies.clone();
            unique.sort_by_key(|s| s.as_str());
            unique.dedup();
            if unique.len() > 1 {
                0.8
            } else {
                0.5
            }
        };

        // Cached turns still count as history-aware: the fingerprint
        // encodes stage and turn bucket.
        let history = 0.7;

        0.3 * profile_score + 0.4 * history + 0.3 * adaptation
    }
}
