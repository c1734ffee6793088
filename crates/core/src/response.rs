//! Response strategies and generated responses

use serde::{Deserialize, Serialize};

use crate::emotion::EmotionLabel;
use crate::intent::IntentCategory;
use crate::stage::CallStage;

/// Named response policy selected by the orchestrator and consumed by the
/// response generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStrategy {
    GentleDecline,
    FirmDecline,
    WittyResponse,
    ExplainNotInterested,
    ClearRefusal,
    DeflectWithHumor,
    ProfessionalResponse,
    FinalWarning,
    ImmediateHangup,
}

impl ResponseStrategy {
    pub const ALL: [ResponseStrategy; 9] = [
        ResponseStrategy::GentleDecline,
        ResponseStrategy::FirmDecline,
        ResponseStrategy::WittyResponse,
        ResponseStrategy::ExplainNotInterested,
        ResponseStrategy::ClearRefusal,
        ResponseStrategy::DeflectWithHumor,
        ResponseStrategy::ProfessionalResponse,
        ResponseStrategy::FinalWarning,
        ResponseStrategy::ImmediateHangup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStrategy::GentleDecline => "gentle_decline",
            ResponseStrategy::FirmDecline => "firm_decline",
            ResponseStrategy::WittyResponse => "witty_response",
            ResponseStrategy::ExplainNotInterested => "explain_not_interested",
            ResponseStrategy::ClearRefusal => "clear_refusal",
            ResponseStrategy::DeflectWithHumor => "deflect_with_humor",
            ResponseStrategy::ProfessionalResponse => "professional_response",
            ResponseStrategy::FinalWarning => "final_warning",
            ResponseStrategy::ImmediateHangup => "immediate_hangup",
        }
    }

    /// Terminal strategies force `should_terminate` on the response.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResponseStrategy::FinalWarning | ResponseStrategy::ImmediateHangup
        )
    }

    /// Stage the conversation moves to after delivering a response with
    /// this strategy. Non-escalating strategies leave the stage unchanged.
    pub fn next_stage(&self, current: CallStage) -> CallStage {
        match self {
            ResponseStrategy::ImmediateHangup => CallStage::CallEnd,
            ResponseStrategy::FinalWarning => CallStage::HangUpWarning,
            ResponseStrategy::FirmDecline | ResponseStrategy::ClearRefusal => {
                CallStage::FirmRejection
            }
            ResponseStrategy::GentleDecline | ResponseStrategy::ExplainNotInterested => {
                CallStage::PoliteDecline
            }
            _ => current,
        }
    }
}

impl std::fmt::Display for ResponseStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generated AI response for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResponse {
    pub text: String,
    pub intent: IntentCategory,
    pub confidence: f32,
    pub emotional_tone: EmotionLabel,
    pub strategy: ResponseStrategy,
    pub should_terminate: bool,
    pub next_stage: CallStage,
    pub generation_time_ms: u64,
    pub cached: bool,
    pub context_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_strategies() {
        assert!(ResponseStrategy::FinalWarning.is_terminal());
        assert!(ResponseStrategy::ImmediateHangup.is_terminal());
        assert!(!ResponseStrategy::GentleDecline.is_terminal());
    }

    #[test]
    fn test_next_stage_mapping() {
        assert_eq!(
            ResponseStrategy::ImmediateHangup.next_stage(CallStage::Initial),
            CallStage::CallEnd
        );
        assert_eq!(
            ResponseStrategy::FinalWarning.next_stage(CallStage::FirmRejection),
            CallStage::HangUpWarning
        );
        assert_eq!(
            ResponseStrategy::FirmDecline.next_stage(CallStage::HandlingLoan),
            CallStage::FirmRejection
        );
        assert_eq!(
            ResponseStrategy::GentleDecline.next_stage(CallStage::HandlingSales),
            CallStage::PoliteDecline
        );
        // Humor keeps the stage where it is.
        assert_eq!(
            ResponseStrategy::DeflectWithHumor.next_stage(CallStage::HandlingSales),
            CallStage::HandlingSales
        );
    }
}
