//! Caller intent categories and classification results

use serde::{Deserialize, Serialize};

/// Recognized nuisance-call categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    SalesCall,
    LoanOffer,
    InvestmentPitch,
    InsuranceSales,
    TelecomOffer,
    #[default]
    Unknown,
}

impl IntentCategory {
    pub const KNOWN: [IntentCategory; 5] = [
        IntentCategory::SalesCall,
        IntentCategory::LoanOffer,
        IntentCategory::InvestmentPitch,
        IntentCategory::InsuranceSales,
        IntentCategory::TelecomOffer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentCategory::SalesCall => "sales_call",
            IntentCategory::LoanOffer => "loan_offer",
            IntentCategory::InvestmentPitch => "investment_pitch",
            IntentCategory::InsuranceSales => "insurance_sales",
            IntentCategory::TelecomOffer => "telecom_offer",
            IntentCategory::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, IntentCategory::Unknown)
    }
}

impl std::fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fused output of the intent classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: IntentCategory,
    /// Fused confidence in [0, 1].
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    /// Tone hint derived alongside classification. Not the authoritative
    /// emotion; the sentiment analyzer owns that.
    pub emotional_tone: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords_matched: Vec<String>,
    /// True when the contextual layer influenced the fused result.
    #[serde(default)]
    pub context_influenced: bool,
}

impl IntentResult {
    /// Result for an utterance no layer could classify.
    pub fn unknown() -> Self {
        Self {
            intent: IntentCategory::Unknown,
            confidence: 0.0,
            sub_category: None,
            emotional_tone: "neutral".to_string(),
            keywords_matched: Vec::new(),
            context_influenced: false,
        }
    }
}
