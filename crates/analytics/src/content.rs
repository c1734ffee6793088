//! Transcript-level content analysis
//!
//! Lexicon-based pass over a completed call: intent and emotion
//! distributions, matched keywords and persistence pressure. No external
//! calls.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use callguard_core::{EmotionLabel, IntentCategory, SentimentLabel, Speaker};
use callguard_engine::lexicon;

use crate::repository::CallRecord;

/// Content analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentAnalysis {
    pub call_id: String,
    pub intent_distribution: HashMap<IntentCategory, usize>,
    pub emotion_distribution: HashMap<EmotionLabel, usize>,
    pub overall_sentiment: SentimentLabel,
    pub keywords: Vec<String>,
    pub persistence_phrases: Vec<String>,
    pub caller_turns: usize,
    pub ai_turns: usize,
}

/// Lexicon content analyzer.
#[derive(Default)]
pub struct ContentAnalyzer;

impl ContentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, record: &CallRecord) -> ContentAnalysis {
        let state = &record.state;

        let mut emotion_distribution: HashMap<EmotionLabel, usize> = HashMap::new();
        for emotion in &state.emotion_trajectory {
            *emotion_distribution.entry(*emotion).or_insert(0) += 1;
        }

        let caller_text: String = state
            .turns
            .iter()
            .filter(|t| t.speaker == Speaker::Caller)
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let mut keywords = Vec::new();
        for lex in lexicon::CATEGORY_LEXICONS.iter() {
            for kw in lexicon::matched_phrases(&caller_text, lex.keywords) {
                if !keywords.contains(&kw) {
                    keywords.push(kw);
                }
            }
        }

        let persistence_phrases =
            lexicon::matched_phrases(&caller_text, lexicon::PERSISTENCE_INDICATORS);

        ContentAnalysis {
            call_id: state.call_id.clone(),
            intent_distribution: state.intent_distribution(),
            overall_sentiment: Self::overall_sentiment(&state.emotion_trajectory),
            emotion_distribution,
            keywords,
            persistence_phrases,
            caller_turns: state.caller_turns(),
            ai_turns: state.turn_count - state.caller_turns(),
        }
    }

    /// Negative when the trajectory leaned hostile, positive when warm.
    fn overall_sentiment(trajectory: &[EmotionLabel]) -> SentimentLabel {
        if trajectory.is_empty() {
            return SentimentLabel::Neutral;
        }
        let hostile = trajectory.iter().filter(|e| e.escalation_rank() >= 5).count();
        let warm = trajectory.iter().filter(|e| e.escalation_rank() <= 1).count();

        if hostile * 3 > trajectory.len() {
            SentimentLabel::Negative
        } else if warm * 3 > trajectory.len() {
            SentimentLabel::Positive
        } else {
            SentimentLabel::Neutral
        }
    }
}
