//! Call termination decisions
//!
//! Derives persistence, frustration and effectiveness metrics from the
//! dialogue state and evaluates the termination rules in a fixed order;
//! the first matching rule wins. Thresholds adapt slowly from observed
//! outcomes, at most once per adaptation window.

use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use callguard_core::{AiResponse, CallStage, DialogueState};
use callguard_config::EngineSettings;

use crate::lexicon;

/// Metrics backing a termination decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationMetrics {
    pub turn_count: usize,
    pub duration_seconds: f64,
    pub persistence: f32,
    pub frustration: f32,
    pub effectiveness: f32,
    pub aggression: f32,
    pub repetition_ratio: f32,
}

/// Suggested strategy adjustment when the call continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuationStrategy {
    EscalateFirmness,
    DeEscalate,
    ChangeApproach,
    MaintainCurrent,
}

/// Outcome of a termination evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationDecision {
    pub terminate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_strategy: Option<ContinuationStrategy>,
    pub metrics: TerminationMetrics,
}

#[derive(Debug, Clone)]
struct Thresholds {
    max_turns: usize,
    max_duration_secs: u64,
    persistence: f32,
    frustration: f32,
    min_effectiveness: f32,
}

#[derive(Default)]
struct DeciderStats {
    evaluations: u64,
    terminations: u64,
}

/// Termination statistics exposed to the metrics endpoint and the
/// learning system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationStats {
    pub evaluations: u64,
    pub terminations: u64,
    pub termination_rate: f32,
    pub max_turns: usize,
    pub persistence_threshold: f32,
    pub frustration_threshold: f32,
}

/// Decides when to end a call and with which parting line.
pub struct TerminationDecider {
    thresholds: RwLock<Thresholds>,
    stats: Mutex<DeciderStats>,
    last_adaptation: Mutex<Option<Instant>>,
    adaptation_window: Duration,
}

impl TerminationDecider {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            thresholds: RwLock::new(Thresholds {
                max_turns: settings.max_turns,
                max_duration_secs: settings.max_duration_secs,
                persistence: settings.persistence_threshold,
                frustration: settings.frustration_threshold,
                min_effectiveness: settings.min_effectiveness,
            }),
            stats: Mutex::new(DeciderStats::default()),
            last_adaptation: Mutex::new(None),
            adaptation_window: Duration::from_secs(settings.adaptation_window_secs),
        }
    }

    /// Evaluate the termination rules for the current turn. Rule order is
    /// fixed; the first match supplies the reason.
    pub fn decide(&self, state: &DialogueState, response: &AiResponse) -> TerminationDecision {
        let metrics = self.gather_metrics(state, response);
        let thresholds = self.thresholds.read().clone();

        let reason = if response.should_terminate {
            Some("explicit_termination")
        } else if metrics.turn_count >= thresholds.max_turns {
            Some("max_turns_exceeded")
        } else if metrics.duration_seconds >= thresholds.max_duration_secs as f64 {
            Some("max_duration_exceeded")
        } else if metrics.persistence >= thresholds.persistence {
            Some("excessive_persistence")
        } else if metrics.frustration >= thresholds.frustration {
            Some("high_frustration")
        } else if metrics.effectiveness < thresholds.min_effectiveness && metrics.turn_count > 4 {
            Some("ineffective_responses")
        } else {
            None
        };

        {
            let mut stats = self.stats.lock();
            stats.evaluations += 1;
            if reason.is_some() {
                stats.terminations += 1;
            }
        }

        match reason {
            Some(reason) => {
                tracing::info!(
                    call_id = %state.call_id,
                    reason,
                    turns = metrics.turn_count,
                    persistence = metrics.persistence,
                    frustration = metrics.frustration,
                    "termination decision"
                );
                TerminationDecision {
                    terminate: true,
                    reason: Some(reason.to_string()),
                    final_response: Some(lexicon::final_utterance(reason).to_string()),
                    continuation_strategy: None,
                    metrics,
                }
            }
            None => {
                let suggestion = if metrics.persistence > 0.6 {
                    ContinuationStrategy::EscalateFirmness
                } else if metrics.frustration > 0.6 {
                    ContinuationStrategy::DeEscalate
                } else if metrics.effectiveness < 0.5 {
                    ContinuationStrategy::ChangeApproach
                } else {
                    ContinuationStrategy::MaintainCurrent
                };
                TerminationDecision {
                    terminate: false,
                    reason: None,
                    final_response: None,
                    continuation_strategy: Some(suggestion),
                    metrics,
                }
            }
        }
    }

    fn gather_metrics(&self, state: &DialogueState, response: &AiResponse) -> TerminationMetrics {
        let turn_count = state.caller_turns();
        let duration_seconds = state.duration_seconds(Utc::now());
        let repetition_ratio = Self::repetition_ratio(state);

        TerminationMetrics {
            turn_count,
            duration_seconds,
            persistence: Self::persistence(state, turn_count, repetition_ratio),
            frustration: Self::frustration(state),
            effectiveness: Self::effectiveness(state, turn_count, response),
            aggression: Self::aggression(state),
            repetition_ratio,
        }
    }

    /// `1 − unique/total` over the last five caller intents.
    fn repetition_ratio(state: &DialogueState) -> f32 {
        let recent = state.recent_intents(5);
        if recent.len() < 3 {
            return 0.0;
        }
        let mut unique = recent.to_vec();
        unique.sort_by_key(|i| i.as_str());
        unique.dedup();
        1.0 - unique.len() as f32 / recent.len() as f32
    }

    fn persistence(state: &DialogueState, turn_count: usize, repetition_ratio: f32) -> f32 {
        if turn_count < 2 {
            return 0.0;
        }

        let turn_score = (turn_count as f32 / 10.0).min(1.0);

        let keyword_score = if turn_count > 8 {
            0.8
        } else if turn_count > 5 {
            0.5
        } else {
            0.0
        };

        let resistance_score = if turn_count > 5 {
            if state.stage == CallStage::Initial || state.stage.is_handling() {
                0.8
            } else if state.stage == CallStage::PoliteDecline {
                0.6
            } else {
                0.0
            }
        } else {
            0.0
        };

        (0.3 * turn_score + 0.3 * repetition_ratio + 0.2 * keyword_score + 0.2 * resistance_score)
            .min(1.0)
    }

    fn frustration(state: &DialogueState) -> f32 {
        let trajectory = &state.emotion_trajectory;
        if trajectory.is_empty() {
            return 0.0;
        }

        let recent = state.recent_emotions(3);
        let recent_score =
            recent.iter().map(|e| e.frustration_weight()).sum::<f32>() / recent.len() as f32;

        let peak = trajectory
            .iter()
            .map(|e| e.frustration_weight())
            .fold(0.0f32, f32::max);

        // Escalation: second half hotter than the first.
        let escalation = if trajectory.len() >= 3 {
            let mid = trajectory.len() / 2;
            let early = trajectory[..mid]
                .iter()
                .map(|e| e.frustration_weight())
                .sum::<f32>()
                / mid.max(1) as f32;
            let late = trajectory[mid..]
                .iter()
                .map(|e| e.frustration_weight())
                .sum::<f32>()
                / (trajectory.len() - mid).max(1) as f32;
            (late - early).max(0.0)
        } else {
            0.0
        };

        (0.5 * recent_score + 0.3 * peak + 0.2 * escalation).min(1.0)
    }

    fn effectiveness(state: &DialogueState, turn_count: usize, response: &AiResponse) -> f32 {
        let stage_score = state.stage.progress_score();
        let turn_efficiency = (1.0 - turn_count as f32 / 10.0).max(0.0);
        (0.4 * stage_score + 0.3 * turn_efficiency + 0.3 * response.confidence).min(1.0)
    }

    fn aggression(state: &DialogueState) -> f32 {
        let recent = state.recent_emotions(5);
        if recent.is_empty() {
            return 0.0;
        }
        let aggressive = recent.iter().filter(|e| e.is_aggressive()).count();
        aggressive as f32 / recent.len() as f32
    }

    /// Adapt thresholds from observed outcomes. A low success rate loosens
    /// (more patience before ending); a high termination rate tightens.
    /// At most one adaptation per window.
    pub fn adapt(&self, success_rate: f32, termination_rate: f32) {
        {
            let mut last = self.last_adaptation.lock();
            if let Some(at) = *last {
                if at.elapsed() < self.adaptation_window {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let mut thresholds = self.thresholds.write();
        if success_rate < 0.8 {
            thresholds.max_turns = (thresholds.max_turns + 1).min(12);
            thresholds.persistence = (thresholds.persistence + 0.05).min(0.95);
            tracing::info!(
                max_turns = thresholds.max_turns,
                persistence = thresholds.persistence,
                "loosened termination thresholds"
            );
        } else if termination_rate > 0.7 {
            thresholds.max_turns = thresholds.max_turns.saturating_sub(1).max(6);
            thresholds.frustration = (thresholds.frustration - 0.05).max(0.75);
            tracing::info!(
                max_turns = thresholds.max_turns,
                frustration = thresholds.frustration,
                "tightened termination thresholds"
            );
        }
    }

    pub fn stats(&self) -> TerminationStats {
        let stats = self.stats.lock();
        let thresholds = self.thresholds.read();
        TerminationStats {
            evaluations: stats.evaluations,
            terminations: stats.terminations,
            termination_rate: if stats.evaluations == 0 {
                0.0
            } else {
                stats.terminations as f32 / stats.evaluations as f32
            },
            max_turns: thresholds.max_turns,
            persistence_threshold: thresholds.persistence,
            frustration_threshold: thresholds.frustration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callguard_core::{
        EmotionLabel, IntentCategory, ResponseStrategy, Speaker, TurnRecord,
    };

    fn settings() -> EngineSettings {
        EngineSettings::default()
    }

    fn response(confidence: f32, should_terminate: bool) -> AiResponse {
        AiResponse {
            text: "我不需要，谢谢。".into(),
            intent: IntentCategory::LoanOffer,
            confidence,
            emotional_tone: EmotionLabel::Polite,
            strategy: ResponseStrategy::GentleDecline,
            should_terminate,
            next_stage: CallStage::PoliteDecline,
            generation_time_ms: 5,
            cached: false,
            context_hash: "fp".into(),
        }
    }

    fn state_with_turns(caller_turns: usize) -> DialogueState {
        let mut state = DialogueState::new("c1", "u1", "fp");
        for _ in 0..caller_turns {
            state.record(TurnRecord::new(Speaker::Caller, "贷款了解一下"));
            state.intent_history.push(IntentCategory::LoanOffer);
            state.emotion_trajectory.push(EmotionLabel::Neutral);
            state.record(TurnRecord::new(Speaker::Ai, "不需要"));
        }
        state
    }

    #[test]
    fn test_explicit_termination_first() {
        let decider = TerminationDecider::new(&settings());
        // Even with the turn cap also exceeded, the explicit rule wins.
        let state = state_with_turns(9);
        let decision = decider.decide(&state, &response(0.9, true));
        assert!(decision.terminate);
        assert_eq!(decision.reason.as_deref(), Some("explicit_termination"));
        assert_eq!(decision.final_response.as_deref(), Some("好的，再见。"));
    }

    #[test]
    fn test_max_turns_rule() {
        let decider = TerminationDecider::new(&settings());
        let state = state_with_turns(8);
        let decision = decider.decide(&state, &response(0.9, false));
        assert!(decision.terminate);
        assert_eq!(decision.reason.as_deref(), Some("max_turns_exceeded"));
    }

    #[test]
    fn test_duration_rule() {
        let decider = TerminationDecider::new(&settings());
        let mut state = state_with_turns(2);
        state.started_at = Utc::now() - chrono::Duration::seconds(200);
        let decision = decider.decide(&state, &response(0.9, false));
        assert!(decision.terminate);
        assert_eq!(decision.reason.as_deref(), Some("max_duration_exceeded"));
    }

    #[test]
    fn test_frustration_rule() {
        let decider = TerminationDecider::new(&settings());
        let mut state = state_with_turns(3);
        state.emotion_trajectory = vec![
            EmotionLabel::Polite,
            EmotionLabel::Polite,
            EmotionLabel::Aggressive,
            EmotionLabel::Aggressive,
            EmotionLabel::Aggressive,
            EmotionLabel::Aggressive,
        ];
        let decision = decider.decide(&state, &response(0.9, false));
        assert!(decision.terminate);
        assert_eq!(decision.reason.as_deref(), Some("high_frustration"));
    }

    #[test]
    fn test_ineffective_rule_needs_turns() {
        let decider = TerminationDecider::new(&settings());

        // Low effectiveness but too few turns: no termination.
        let state = state_with_turns(3);
        let decision = decider.decide(&state, &response(0.0, false));
        assert!(!decision.terminate);

        // Past four turns, flat confidence and no stage progress fire it.
        let state = state_with_turns(7);
        let decision = decider.decide(&state, &response(0.0, false));
        assert!(decision.terminate);
        assert_eq!(decision.reason.as_deref(), Some("ineffective_responses"));
    }

    #[test]
    fn test_continuation_suggestions() {
        let decider = TerminationDecider::new(&settings());

        let state = state_with_turns(1);
        let decision = decider.decide(&state, &response(0.9, false));
        assert!(!decision.terminate);
        assert_eq!(
            decision.continuation_strategy,
            Some(ContinuationStrategy::MaintainCurrent)
        );

        // Moderate persistence suggests escalating firmness.
        let state = state_with_turns(7);
        let mut thresholds_high = settings();
        thresholds_high.persistence_threshold = 0.99;
        let lenient = TerminationDecider::new(&thresholds_high);
        let decision = lenient.decide(&state, &response(0.9, false));
        assert!(!decision.terminate);
        assert_eq!(
            decision.continuation_strategy,
            Some(ContinuationStrategy::EscalateFirmness)
        );
    }

    #[test]
    fn test_persistence_metric_bounds() {
        let state = state_with_turns(9);
        let ratio = TerminationDecider::repetition_ratio(&state);
        assert!(ratio > 0.7);
        let persistence = TerminationDecider::persistence(&state, 9, ratio);
        assert!((0.0..=1.0).contains(&persistence));
        assert!(persistence >= 0.8);
    }

    #[test]
    fn test_adaptation_window() {
        let decider = TerminationDecider::new(&settings());

        decider.adapt(0.5, 0.1);
        assert_eq!(decider.stats().max_turns, 9);

        // Second adaptation inside the window is a no-op.
        decider.adapt(0.5, 0.1);
        assert_eq!(decider.stats().max_turns, 9);
    }

    #[test]
    fn test_adaptation_tighten() {
        let mut settings = settings();
        settings.adaptation_window_secs = 0;
        let decider = TerminationDecider::new(&settings);

        decider.adapt(0.9, 0.8);
        let stats = decider.stats();
        assert_eq!(stats.max_turns, 7);
        assert!(stats.frustration_threshold < 0.9);
    }
}
