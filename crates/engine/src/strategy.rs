//! Response strategy selection
//!
//! Strategy comes from a (stage × personality) table with two dynamic
//! overrides for long or hostile calls. Terminal stages always map to
//! terminal strategies regardless of overrides.

use callguard_core::{CallStage, PersonalityType, ResponseStrategy};

/// Select the response strategy for the current turn.
pub fn select_strategy(
    stage: CallStage,
    personality: PersonalityType,
    caller_turns: usize,
    emotional_tone: &str,
) -> ResponseStrategy {
    // Terminal stages decide for themselves.
    match stage {
        CallStage::CallEnd => return ResponseStrategy::ImmediateHangup,
        CallStage::HangUpWarning => return ResponseStrategy::FinalWarning,
        _ => {}
    }

    // Dynamic overrides.
    if caller_turns > 8 {
        return ResponseStrategy::FinalWarning;
    }
    if caller_turns > 5 && emotional_tone == "aggressive" {
        return ResponseStrategy::FirmDecline;
    }

    match stage {
        CallStage::Initial => match personality {
            PersonalityType::Polite => ResponseStrategy::GentleDecline,
            PersonalityType::Direct => ResponseStrategy::FirmDecline,
            PersonalityType::Humorous => ResponseStrategy::WittyResponse,
            PersonalityType::Professional => ResponseStrategy::ProfessionalResponse,
        },
        s if s.is_handling() => match personality {
            PersonalityType::Polite => ResponseStrategy::ExplainNotInterested,
            PersonalityType::Direct => ResponseStrategy::ClearRefusal,
            PersonalityType::Humorous => ResponseStrategy::DeflectWithHumor,
            PersonalityType::Professional => ResponseStrategy::ProfessionalResponse,
        },
        CallStage::PoliteDecline => match personality {
            PersonalityType::Polite => ResponseStrategy::GentleDecline,
            PersonalityType::Direct => ResponseStrategy::ClearRefusal,
            PersonalityType::Humorous => ResponseStrategy::DeflectWithHumor,
            PersonalityType::Professional => ResponseStrategy::ProfessionalResponse,
        },
        CallStage::FirmRejection => ResponseStrategy::FirmDecline,
        // Terminal stages returned above.
        _ => ResponseStrategy::GentleDecline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_by_personality() {
        assert_eq!(
            select_strategy(CallStage::Initial, PersonalityType::Polite, 1, "neutral"),
            ResponseStrategy::GentleDecline
        );
        assert_eq!(
            select_strategy(CallStage::HandlingLoan, PersonalityType::Polite, 1, "neutral"),
            ResponseStrategy::ExplainNotInterested
        );
        assert_eq!(
            select_strategy(CallStage::HandlingSales, PersonalityType::Humorous, 2, "neutral"),
            ResponseStrategy::DeflectWithHumor
        );
        assert_eq!(
            select_strategy(CallStage::FirmRejection, PersonalityType::Polite, 3, "neutral"),
            ResponseStrategy::FirmDecline
        );
    }

    #[test]
    fn test_terminal_stages() {
        assert_eq!(
            select_strategy(CallStage::HangUpWarning, PersonalityType::Polite, 2, "neutral"),
            ResponseStrategy::FinalWarning
        );
        assert_eq!(
            select_strategy(CallStage::CallEnd, PersonalityType::Direct, 2, "neutral"),
            ResponseStrategy::ImmediateHangup
        );
    }

    #[test]
    fn test_turn_count_override() {
        assert_eq!(
            select_strategy(CallStage::HandlingSales, PersonalityType::Polite, 9, "neutral"),
            ResponseStrategy::FinalWarning
        );
    }

    #[test]
    fn test_aggression_override() {
        assert_eq!(
            select_strategy(
                CallStage::HandlingSales,
                PersonalityType::Polite,
                6,
                "aggressive"
            ),
            ResponseStrategy::FirmDecline
        );
        // Not yet deep enough into the call.
        assert_eq!(
            select_strategy(
                CallStage::HandlingSales,
                PersonalityType::Polite,
                4,
                "aggressive"
            ),
            ResponseStrategy::ExplainNotInterested
        );
    }
}
