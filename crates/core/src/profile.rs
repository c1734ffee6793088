//! User and spam-caller profiles

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Personality the generated responses imitate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityType {
    #[default]
    Polite,
    Direct,
    Humorous,
    Professional,
}

impl PersonalityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonalityType::Polite => "polite",
            PersonalityType::Direct => "direct",
            PersonalityType::Humorous => "humorous",
            PersonalityType::Professional => "professional",
        }
    }
}

/// Speech style controlling response length and register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpeechStyle {
    Brief,
    #[default]
    Normal,
    Detailed,
    Formal,
    Friendly,
}

impl SpeechStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeechStyle::Brief => "brief",
            SpeechStyle::Normal => "normal",
            SpeechStyle::Detailed => "detailed",
            SpeechStyle::Formal => "formal",
            SpeechStyle::Friendly => "friendly",
        }
    }

    /// Soft response length guideline in tokens.
    pub fn token_guideline(&self) -> usize {
        match self {
            SpeechStyle::Brief => 20,
            SpeechStyle::Normal => 40,
            SpeechStyle::Detailed => 80,
            SpeechStyle::Formal => 60,
            SpeechStyle::Friendly => 50,
        }
    }
}

/// Aggregated effectiveness metrics maintained by the learning system.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EffectivenessStats {
    pub calls_handled: u64,
    pub successful_terminations: u64,
    pub avg_effectiveness: f32,
    pub avg_turn_count: f32,
}

impl EffectivenessStats {
    /// Fold one completed call into the running averages.
    pub fn record_call(&mut self, effectiveness: f32, turns: usize, terminated: bool) {
        let n = self.calls_handled as f32;
        self.avg_effectiveness = (self.avg_effectiveness * n + effectiveness) / (n + 1.0);
        self.avg_turn_count = (self.avg_turn_count * n + turns as f32) / (n + 1.0);
        self.calls_handled += 1;
        if terminated {
            self.successful_terminations += 1;
        }
    }
}

/// Per-user profile, read-mostly during a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub personality: PersonalityType,
    #[serde(default)]
    pub speech_style: SpeechStyle,
    /// Open-ended settings consumed by the response generator.
    #[serde(default)]
    pub preferences: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub effectiveness: EffectivenessStats,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            personality: PersonalityType::default(),
            speech_style: SpeechStyle::default(),
            preferences: HashMap::new(),
            effectiveness: EffectivenessStats::default(),
        }
    }

    pub fn with_personality(mut self, personality: PersonalityType) -> Self {
        self.personality = personality;
        self
    }

    pub fn with_speech_style(mut self, style: SpeechStyle) -> Self {
        self.speech_style = style;
        self
    }
}

/// Spam classification of a caller fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpamCategory {
    Sales,
    Loan,
    Investment,
    Insurance,
    Telecom,
    Scam,
    #[default]
    Unknown,
}

impl SpamCategory {
    /// Category implied by a classified call intent.
    pub fn from_intent(intent: crate::intent::IntentCategory) -> Self {
        use crate::intent::IntentCategory;
        match intent {
            IntentCategory::SalesCall => SpamCategory::Sales,
            IntentCategory::LoanOffer => SpamCategory::Loan,
            IntentCategory::InvestmentPitch => SpamCategory::Investment,
            IntentCategory::InsuranceSales => SpamCategory::Insurance,
            IntentCategory::TelecomOffer => SpamCategory::Telecom,
            IntentCategory::Unknown => SpamCategory::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpamCategory::Sales => "sales",
            SpamCategory::Loan => "loan",
            SpamCategory::Investment => "investment",
            SpamCategory::Insurance => "insurance",
            SpamCategory::Telecom => "telecom",
            SpamCategory::Scam => "scam",
            SpamCategory::Unknown => "unknown",
        }
    }
}

/// Per-fingerprint spam profile. Updated by the post-call pipeline, read by
/// the intent classifier as a prior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamProfile {
    pub caller_fingerprint: String,
    pub category: SpamCategory,
    pub risk_score: f32,
    pub confidence: f32,
    pub report_count: u64,
    pub successful_blocks: u64,
    pub bypass_attempts: u64,
    pub last_activity: DateTime<Utc>,
}

impl SpamProfile {
    pub fn new(caller_fingerprint: impl Into<String>, category: SpamCategory) -> Self {
        Self {
            caller_fingerprint: caller_fingerprint.into(),
            category,
            risk_score: 0.5,
            confidence: 0.5,
            report_count: 0,
            successful_blocks: 0,
            bypass_attempts: 0,
            last_activity: Utc::now(),
        }
    }
}
