//! Call stages for the anti-nuisance dialogue state machine

use serde::{Deserialize, Serialize};

use crate::intent::IntentCategory;

/// Position in the dialogue state machine.
///
/// A call opens in `Initial`, moves into a `Handling*` stage once the
/// caller's pitch category is recognized, and escalates through
/// `PoliteDecline` / `FirmRejection` / `HangUpWarning` to `CallEnd` as the
/// caller persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallStage {
    #[default]
    Initial,
    HandlingSales,
    HandlingLoan,
    HandlingInvestment,
    HandlingInsurance,
    HandlingTelecom,
    PoliteDecline,
    FirmRejection,
    HangUpWarning,
    CallEnd,
}

impl CallStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStage::Initial => "initial",
            CallStage::HandlingSales => "handling_sales",
            CallStage::HandlingLoan => "handling_loan",
            CallStage::HandlingInvestment => "handling_investment",
            CallStage::HandlingInsurance => "handling_insurance",
            CallStage::HandlingTelecom => "handling_telecom",
            CallStage::PoliteDecline => "polite_decline",
            CallStage::FirmRejection => "firm_rejection",
            CallStage::HangUpWarning => "hang_up_warning",
            CallStage::CallEnd => "call_end",
        }
    }

    /// Whether the stage is one of the five pitch-handling stages.
    pub fn is_handling(&self) -> bool {
        matches!(
            self,
            CallStage::HandlingSales
                | CallStage::HandlingLoan
                | CallStage::HandlingInvestment
                | CallStage::HandlingInsurance
                | CallStage::HandlingTelecom
        )
    }

    /// Whether the call is over in this stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStage::CallEnd)
    }

    /// Handling stage for a recognized pitch category, used by the
    /// `Initial` transition rule.
    pub fn for_intent(intent: IntentCategory) -> Option<CallStage> {
        match intent {
            IntentCategory::SalesCall => Some(CallStage::HandlingSales),
            IntentCategory::LoanOffer => Some(CallStage::HandlingLoan),
            IntentCategory::InvestmentPitch => Some(CallStage::HandlingInvestment),
            IntentCategory::InsuranceSales => Some(CallStage::HandlingInsurance),
            IntentCategory::TelecomOffer => Some(CallStage::HandlingTelecom),
            IntentCategory::Unknown => None,
        }
    }

    /// How far the conversation has progressed towards shutting the pitch
    /// down. Feeds the termination decider and the effectiveness evaluator.
    pub fn progress_score(&self) -> f32 {
        match self {
            CallStage::CallEnd => 1.0,
            CallStage::HangUpWarning => 0.8,
            CallStage::FirmRejection => 0.6,
            _ => 0.3,
        }
    }
}

impl std::fmt::Display for CallStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_for_intent() {
        assert_eq!(
            CallStage::for_intent(IntentCategory::LoanOffer),
            Some(CallStage::HandlingLoan)
        );
        assert_eq!(CallStage::for_intent(IntentCategory::Unknown), None);
    }

    #[test]
    fn test_progress_ordering() {
        assert!(CallStage::CallEnd.progress_score() > CallStage::HangUpWarning.progress_score());
        assert!(
            CallStage::HangUpWarning.progress_score() > CallStage::FirmRejection.progress_score()
        );
        assert!(CallStage::FirmRejection.progress_score() > CallStage::Initial.progress_score());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&CallStage::HangUpWarning).unwrap();
        assert_eq!(json, "\"hang_up_warning\"");
    }
}
