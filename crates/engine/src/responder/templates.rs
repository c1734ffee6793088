//! Template bank
//!
//! Deterministic fallback responses indexed by (stage, spam category). The
//! bank always yields a non-empty string; template choice is keyed on the
//! response fingerprint so identical fingerprints produce identical text.

use callguard_core::{CallStage, SpamCategory};

static SALES_TEMPLATES: &[&str] = &[
    "谢谢您的来电，但我现在不太方便。",
    "不好意思，我正在忙，稍后再说。",
    "感谢您的介绍，但我暂时不需要。",
];

static LOAN_TEMPLATES: &[&str] = &[
    "谢谢，我目前没有贷款需求。",
    "我的财务状况良好，不需要贷款。",
    "感谢您的好意，但我不考虑贷款。",
];

static INVESTMENT_TEMPLATES: &[&str] = &[
    "我有自己的投资规划，谢谢。",
    "投资的事情我会自己考虑的。",
    "谢谢介绍，但我不感兴趣。",
];

static INSURANCE_TEMPLATES: &[&str] = &[
    "我已经有保险安排了，谢谢。",
    "保险的事情我暂时不考虑，谢谢。",
];

static TELECOM_TEMPLATES: &[&str] = &[
    "我的套餐够用，不需要更改，谢谢。",
    "不用了，我对现在的资费很满意。",
];

static POLITE_DECLINE_TEMPLATES: &[&str] = &[
    "真的谢谢您，但我确实不需要。",
    "我理解您的工作，但请理解我的选择。",
    "很感谢您的耐心，但我真的不考虑。",
];

static FIRM_REJECTION_TEMPLATES: &[&str] = &[
    "我已经说得很清楚了，请不要再打扰。",
    "请将我的号码从你们的名单中删除。",
    "我不需要这些服务，请停止拨打。",
];

static HANG_UP_WARNING_TEMPLATES: &[&str] = &[
    "再说下去我只能挂断了，请自重。",
    "这是最后一次提醒，请不要再拨打这个号码。",
];

static CALL_END_TEMPLATES: &[&str] = &["好的，再见。", "就到这里，再见。"];

static DEFAULT_TEMPLATES: &[&str] = &["不好意思，我现在不方便。"];

fn category_templates(category: SpamCategory) -> &'static [&'static str] {
    match category {
        SpamCategory::Sales => SALES_TEMPLATES,
        SpamCategory::Loan => LOAN_TEMPLATES,
        SpamCategory::Investment => INVESTMENT_TEMPLATES,
        SpamCategory::Insurance => INSURANCE_TEMPLATES,
        SpamCategory::Telecom => TELECOM_TEMPLATES,
        SpamCategory::Scam | SpamCategory::Unknown => DEFAULT_TEMPLATES,
    }
}

/// Templates for a (stage, category) pair. Never empty.
pub fn templates_for(stage: CallStage, category: SpamCategory) -> &'static [&'static str] {
    match stage {
        CallStage::Initial => category_templates(category),
        CallStage::HandlingSales => SALES_TEMPLATES,
        CallStage::HandlingLoan => LOAN_TEMPLATES,
        CallStage::HandlingInvestment => INVESTMENT_TEMPLATES,
        CallStage::HandlingInsurance => INSURANCE_TEMPLATES,
        CallStage::HandlingTelecom => TELECOM_TEMPLATES,
        CallStage::PoliteDecline => POLITE_DECLINE_TEMPLATES,
        CallStage::FirmRejection => FIRM_REJECTION_TEMPLATES,
        CallStage::HangUpWarning => HANG_UP_WARNING_TEMPLATES,
        CallStage::CallEnd => CALL_END_TEMPLATES,
    }
}

/// Deterministic template selection keyed on the response fingerprint.
pub fn pick(stage: CallStage, category: SpamCategory, fingerprint: &str) -> &'static str {
    let bank = templates_for(stage, category);
    let seed = fingerprint
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    bank[seed % bank.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pair_non_empty() {
        let stages = [
            CallStage::Initial,
            CallStage::HandlingSales,
            CallStage::HandlingLoan,
            CallStage::HandlingInvestment,
            CallStage::HandlingInsurance,
            CallStage::HandlingTelecom,
            CallStage::PoliteDecline,
            CallStage::FirmRejection,
            CallStage::HangUpWarning,
            CallStage::CallEnd,
        ];
        let categories = [
            SpamCategory::Sales,
            SpamCategory::Loan,
            SpamCategory::Investment,
            SpamCategory::Insurance,
            SpamCategory::Telecom,
            SpamCategory::Scam,
            SpamCategory::Unknown,
        ];
        for stage in stages {
            for category in categories {
                assert!(!templates_for(stage, category).is_empty());
                assert!(!pick(stage, category, "fp").is_empty());
            }
        }
    }

    #[test]
    fn test_pick_deterministic() {
        let a = pick(CallStage::HandlingLoan, SpamCategory::Loan, "fingerprint-1");
        let b = pick(CallStage::HandlingLoan, SpamCategory::Loan, "fingerprint-1");
        assert_eq!(a, b);
    }
}
