//! Emotion and sentiment types
//!
//! The emotion label set is one closed enum covering the base emotions the
//! remote text-analytics service understands plus the dialogue-specific
//! states the lexicon analyzers detect.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Document-level sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    #[default]
    Neutral,
}

impl SentimentLabel {
    /// The remote endpoint may report `mixed`; that folds to neutral.
    pub fn from_remote(label: &str) -> Self {
        match label {
            "positive" => SentimentLabel::Positive,
            "negative" => SentimentLabel::Negative,
            _ => SentimentLabel::Neutral,
        }
    }
}

/// Closed emotion label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmotionLabel {
    #[default]
    Neutral,
    Joy,
    Anger,
    Fear,
    Sadness,
    Disgust,
    Surprise,
    Frustrated,
    Annoyed,
    Patient,
    Polite,
    Firm,
    Friendly,
    Dismissive,
    Aggressive,
    Confused,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 16] = [
        EmotionLabel::Neutral,
        EmotionLabel::Joy,
        EmotionLabel::Anger,
        EmotionLabel::Fear,
        EmotionLabel::Sadness,
        EmotionLabel::Disgust,
        EmotionLabel::Surprise,
        EmotionLabel::Frustrated,
        EmotionLabel::Annoyed,
        EmotionLabel::Patient,
        EmotionLabel::Polite,
        EmotionLabel::Firm,
        EmotionLabel::Friendly,
        EmotionLabel::Dismissive,
        EmotionLabel::Aggressive,
        EmotionLabel::Confused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Joy => "joy",
            EmotionLabel::Anger => "anger",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Sadness => "sadness",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Surprise => "surprise",
            EmotionLabel::Frustrated => "frustrated",
            EmotionLabel::Annoyed => "annoyed",
            EmotionLabel::Patient => "patient",
            EmotionLabel::Polite => "polite",
            EmotionLabel::Firm => "firm",
            EmotionLabel::Friendly => "friendly",
            EmotionLabel::Dismissive => "dismissive",
            EmotionLabel::Aggressive => "aggressive",
            EmotionLabel::Confused => "confused",
        }
    }

    /// Intensity weight used when aggregating emotion scores.
    /// Dialogue-specific labels map onto their nearest base emotion.
    pub fn intensity_weight(&self) -> f32 {
        match self {
            EmotionLabel::Anger | EmotionLabel::Aggressive => 1.0,
            EmotionLabel::Disgust => 0.9,
            EmotionLabel::Fear | EmotionLabel::Frustrated => 0.8,
            EmotionLabel::Sadness => 0.7,
            EmotionLabel::Joy | EmotionLabel::Annoyed => 0.6,
            EmotionLabel::Surprise | EmotionLabel::Dismissive => 0.5,
            EmotionLabel::Firm => 0.4,
            EmotionLabel::Confused => 0.3,
            EmotionLabel::Friendly | EmotionLabel::Patient | EmotionLabel::Polite => 0.1,
            EmotionLabel::Neutral => 0.0,
        }
    }

    /// Frustration contribution used by the termination decider.
    pub fn frustration_weight(&self) -> f32 {
        match self {
            EmotionLabel::Aggressive | EmotionLabel::Anger => 1.0,
            EmotionLabel::Disgust => 0.9,
            EmotionLabel::Frustrated => 0.8,
            EmotionLabel::Fear => 0.7,
            EmotionLabel::Annoyed => 0.6,
            EmotionLabel::Dismissive => 0.5,
            EmotionLabel::Firm => 0.4,
            EmotionLabel::Confused | EmotionLabel::Sadness => 0.3,
            EmotionLabel::Neutral | EmotionLabel::Surprise => 0.2,
            EmotionLabel::Patient => 0.1,
            EmotionLabel::Polite
            | EmotionLabel::Friendly
            | EmotionLabel::Joy => 0.0,
        }
    }

    /// Ordinal rank on the calm-to-hostile axis, used by the learning
    /// system's escalation detection.
    pub fn escalation_rank(&self) -> u8 {
        match self {
            EmotionLabel::Friendly | EmotionLabel::Joy => 1,
            EmotionLabel::Neutral
            | EmotionLabel::Polite
            | EmotionLabel::Surprise
            | EmotionLabel::Confused => 2,
            EmotionLabel::Patient => 3,
            EmotionLabel::Firm | EmotionLabel::Sadness | EmotionLabel::Fear => 4,
            EmotionLabel::Annoyed | EmotionLabel::Dismissive => 5,
            EmotionLabel::Frustrated | EmotionLabel::Disgust => 6,
            EmotionLabel::Aggressive | EmotionLabel::Anger => 7,
        }
    }

    /// Whether the label reads as hostile.
    pub fn is_aggressive(&self) -> bool {
        matches!(
            self,
            EmotionLabel::Aggressive | EmotionLabel::Anger | EmotionLabel::Frustrated
        )
    }
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sentiment assessment with per-class confidence scores.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SentimentAssessment {
    pub label: SentimentLabel,
    pub confidence: f32,
    #[serde(default)]
    pub scores: HashMap<SentimentLabel, f32>,
}

/// Emotion assessment with per-label scores.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmotionAssessment {
    pub primary: EmotionLabel,
    pub confidence: f32,
    #[serde(default)]
    pub scores: HashMap<EmotionLabel, f32>,
}

/// Coarse sales-call stage predicted from the utterance alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SalesStage {
    Opening,
    Presentation,
    ObjectionHandling,
    Closing,
    Termination,
    #[default]
    Unknown,
}

/// Which backend produced an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    Local,
    Remote,
    Lexicon,
    /// Every backend failed; the analysis is fully neutral.
    Fallback,
}

/// Combined per-utterance analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationAnalysis {
    pub sentiment: SentimentAssessment,
    pub emotion: EmotionAssessment,
    #[serde(default)]
    pub intent_signals: Vec<String>,
    #[serde(default)]
    pub persistence_indicators: Vec<String>,
    #[serde(default)]
    pub termination_signals: Vec<String>,
    pub emotional_intensity: f32,
    pub stage_prediction: SalesStage,
    pub source: AnalysisSource,
}

impl ConversationAnalysis {
    /// Fully-neutral analysis returned when every backend fails. Never
    /// raised to callers as an error.
    pub fn neutral_fallback() -> Self {
        Self {
            sentiment: SentimentAssessment {
                label: SentimentLabel::Neutral,
                confidence: 0.5,
                scores: HashMap::new(),
            },
            emotion: EmotionAssessment {
                primary: EmotionLabel::Neutral,
                confidence: 0.5,
                scores: HashMap::new(),
            },
            intent_signals: Vec::new(),
            persistence_indicators: Vec::new(),
            termination_signals: Vec::new(),
            emotional_intensity: 0.0,
            stage_prediction: SalesStage::Unknown,
            source: AnalysisSource::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intensity_weights() {
        assert_eq!(EmotionLabel::Anger.intensity_weight(), 1.0);
        assert_eq!(EmotionLabel::Disgust.intensity_weight(), 0.9);
        assert_eq!(EmotionLabel::Neutral.intensity_weight(), 0.0);
    }

    #[test]
    fn test_escalation_ranks_monotonic() {
        assert!(
            EmotionLabel::Aggressive.escalation_rank() > EmotionLabel::Annoyed.escalation_rank()
        );
        assert!(EmotionLabel::Annoyed.escalation_rank() > EmotionLabel::Friendly.escalation_rank());
    }

    #[test]
    fn test_remote_sentiment_folds_mixed() {
        assert_eq!(SentimentLabel::from_remote("mixed"), SentimentLabel::Neutral);
        assert_eq!(
            SentimentLabel::from_remote("positive"),
            SentimentLabel::Positive
        );
    }

    #[test]
    fn test_neutral_fallback() {
        let analysis = ConversationAnalysis::neutral_fallback();
        assert_eq!(analysis.sentiment.confidence, 0.5);
        assert_eq!(analysis.emotion.primary, EmotionLabel::Neutral);
        assert_eq!(analysis.source, AnalysisSource::Fallback);
    }
}
