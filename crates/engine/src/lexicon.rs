//! Fixed lexicons for Mandarin nuisance-call dialogue
//!
//! Keyword tables, regex patterns and canned utterances used across the
//! classifier, the analyzer, the state tracker and the termination decider.
//! Patterns compile once.

use once_cell::sync::Lazy;
use regex::Regex;

use callguard_core::{EmotionLabel, IntentCategory};

/// Per-category keyword/pattern configuration for intent detection.
pub struct CategoryLexicon {
    pub category: IntentCategory,
    pub keywords: &'static [&'static str],
    pub patterns: &'static [&'static str],
    /// Category prior applied to the combined keyword/pattern score.
    pub weight: f32,
    pub sub_categories: &'static [&'static str],
}

pub static CATEGORY_LEXICONS: [CategoryLexicon; 5] = [
    CategoryLexicon {
        category: IntentCategory::SalesCall,
        keywords: &[
            "产品", "促销", "优惠", "活动", "了解一下", "介绍", "推荐", "特价", "折扣", "新品",
            "试用", "体验", "购买", "订购", "下单",
        ],
        patterns: &[
            "有.*产品.*推荐",
            "了解.*我们的.*服务",
            "给您介绍.*优惠",
            "最新.*活动",
        ],
        weight: 0.35,
        sub_categories: &["product_sales", "service_promotion", "discount_offer"],
    },
    CategoryLexicon {
        category: IntentCategory::LoanOffer,
        keywords: &[
            "贷款", "借钱", "利息", "额度", "征信", "放款", "审批", "利率", "还款", "信用",
            "资金", "融资", "借贷", "分期", "授信", "银行",
        ],
        patterns: &[
            "贷款.*额度",
            "利息.*优惠",
            "无需.*抵押",
            "快速.*放款",
            "征信.*要求",
            "贷款.*需求",
        ],
        weight: 0.4,
        sub_categories: &["personal_loan", "business_loan", "credit_card"],
    },
    CategoryLexicon {
        category: IntentCategory::InvestmentPitch,
        keywords: &[
            "投资", "理财", "收益", "股票", "基金", "赚钱", "回报", "盈利", "分红", "资产",
            "配置", "财富", "增值", "风险", "机会",
        ],
        patterns: &[
            "投资.*机会",
            "高.*收益",
            "理财.*产品",
            "财富.*增值",
            "资产.*配置",
        ],
        weight: 0.35,
        sub_categories: &["stock_investment", "fund_investment", "wealth_management"],
    },
    CategoryLexicon {
        category: IntentCategory::InsuranceSales,
        keywords: &[
            "保险", "保障", "理赔", "保费", "受益人", "保单", "投保", "承保", "赔付", "险种",
            "意外", "医疗", "养老", "重疾", "寿险",
        ],
        patterns: &["保险.*保障", "意外.*理赔", "医疗.*保险", "养老.*规划"],
        weight: 0.3,
        sub_categories: &["life_insurance", "health_insurance", "property_insurance"],
    },
    CategoryLexicon {
        category: IntentCategory::TelecomOffer,
        keywords: &[
            "套餐", "流量", "话费", "宽带", "5g", "升级", "优惠", "充值", "办理", "运营商",
            "电话卡", "手机号", "网络", "提速", "资费",
        ],
        patterns: &["套餐.*升级", "流量.*优惠", "宽带.*提速", "话费.*充值"],
        weight: 0.25,
        sub_categories: &["mobile_plan", "broadband", "value_added_service"],
    },
];

/// Compiled regex patterns per category, in `CATEGORY_LEXICONS` order.
pub static COMPILED_PATTERNS: Lazy<Vec<(IntentCategory, Vec<Regex>)>> = Lazy::new(|| {
    CATEGORY_LEXICONS
        .iter()
        .map(|lex| {
            let compiled = lex
                .patterns
                .iter()
                .filter_map(|p| match Regex::new(p) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::error!(pattern = p, error = %e, "bad intent pattern");
                        None
                    }
                })
                .collect();
            (lex.category, compiled)
        })
        .collect()
});

/// Sub-category marker words.
pub static SUB_CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("product_sales", &["产品", "商品", "货物"]),
    ("service_promotion", &["服务", "体验", "试用"]),
    ("discount_offer", &["折扣", "优惠", "特价"]),
    ("personal_loan", &["个人", "消费", "生活"]),
    ("business_loan", &["企业", "经营", "生意"]),
    ("credit_card", &["信用卡", "额度", "分期"]),
    ("stock_investment", &["股票", "股市", "炒股"]),
    ("fund_investment", &["基金", "定投", "净值"]),
    ("wealth_management", &["理财", "财富", "资产"]),
    ("life_insurance", &["寿险", "养老", "终身"]),
    ("health_insurance", &["医疗", "重疾", "住院"]),
    ("property_insurance", &["财产", "车险", "家财"]),
    ("mobile_plan", &["套餐", "流量", "通话"]),
    ("broadband", &["宽带", "网络", "提速"]),
    ("value_added_service", &["增值", "会员", "彩铃"]),
];

// Tone lexicons used for the classifier's emotional-tone hint.

pub static AGGRESSIVE_TONE: &[&str] = &["必须", "马上", "立即", "错过", "最后", "仅限"];
pub static FRIENDLY_TONE: &[&str] = &["您好", "请问", "方便", "打扰", "谢谢", "麻烦"];
pub static PERSISTENT_TONE: &[&str] = &["再", "还是", "真的", "确实", "一定", "肯定"];

/// Farewell lexicon. Matching any of these triggers the goodbye transition.
pub static GOODBYE_PHRASES: &[&str] = &["再见", "拜拜", "挂了", "好的", "知道了", "明白了"];

/// Pitch words a caller keeps using after being firmly rejected.
pub static PITCH_PHRASES: &[&str] = &["但是", "其实", "真的", "确实", "机会", "错过"];

/// Interrogative markers for the question trigger.
pub static QUESTION_MARKERS: &[&str] = &["?", "？", "吗", "呢"];

/// Words signalling open hostility in the caller's utterance.
pub static AGGRESSION_MARKERS: &[&str] = &["威胁", "投诉", "曝光", "骚扰", "报警", "举报"];

/// Key-point markers per intent category, scanned for a ≤20-char window.
pub static KEY_POINT_MARKERS: &[(IntentCategory, &[&str])] = &[
    (IntentCategory::LoanOffer, &["额度", "利率", "期限"]),
    (IntentCategory::InvestmentPitch, &["收益", "风险", "产品"]),
    (IntentCategory::SalesCall, &["产品", "价格", "优惠"]),
    (IntentCategory::InsuranceSales, &["保费", "保障", "理赔"]),
    (IntentCategory::TelecomOffer, &["套餐", "流量", "资费"]),
];

/// Per-emotion keyword sets for the lexicon analysis backend.
pub static EMOTION_PATTERNS: &[(EmotionLabel, &[&str])] = &[
    (
        EmotionLabel::Frustrated,
        &[
            "为什么", "怎么这样", "太过分", "真是的", "不能接受", "太讨厌", "真烦人", "不耐烦",
            "没必要", "很生气",
        ],
    ),
    (
        EmotionLabel::Annoyed,
        &[
            "不耐烦", "烦人", "算了", "不用了", "老是", "总是", "又来", "不想听", "烦死了",
            "让人烦",
        ],
    ),
    (
        EmotionLabel::Patient,
        &[
            "我理解", "没关系", "可以理解", "没问题", "好的", "不急", "慢慢说", "没事", "等一下",
            "慢慢来",
        ],
    ),
    (
        EmotionLabel::Polite,
        &[
            "谢谢", "抱歉", "麻烦", "请问", "您好", "不好意思", "劳烦", "辛苦", "感谢", "对不起",
        ],
    ),
    (
        EmotionLabel::Firm,
        &[
            "不可能", "绝对不", "明确拒绝", "坚决不", "一定不", "没商量", "不用谈", "无法接受",
            "不可行", "不同意",
        ],
    ),
    (
        EmotionLabel::Friendly,
        &[
            "哈哈", "好的呀", "不错呀", "挺好", "可以的", "没问题呀", "好啊", "行啊", "当然",
            "欢迎",
        ],
    ),
    (
        EmotionLabel::Dismissive,
        &[
            "算了吧", "随便吧", "无所谓", "在乎吗", "无论如何", "没兴趣", "不在乎", "随个便",
            "不管了",
        ],
    ),
    (
        EmotionLabel::Aggressive,
        &["威胁", "投诉", "曝光", "报警", "举报", "滚", "有病"],
    ),
    (
        EmotionLabel::Anger,
        &["生气", "恼火", "讨厌", "气死", "火大"],
    ),
    (
        EmotionLabel::Confused,
        &["什么意思", "没听懂", "不明白", "听不懂", "没搞懂"],
    ),
];

/// Caller phrases indicating the pitch will not let go.
pub static PERSISTENCE_INDICATORS: &[&str] = &[
    "再考虑", "再想想", "不要急", "给个机会", "等一下", "听我说", "先听听", "不用急着决定",
    "了解一下", "介绍一下",
];

/// Caller phrases indicating building frustration.
pub static FRUSTRATION_INDICATORS: &[&str] = &[
    "为什么不", "为什么还", "怎么还", "怎么不", "你们怎么", "不是说了", "已经说了", "不是已经",
    "明明说了", "不是告诉",
];

/// Phrases that signal the call is wrapping up.
pub static TERMINATION_SIGNALS: &[&str] = &[
    "再见", "拜拜", "挂了", "不要再打", "别再打", "就这样", "先这样", "不聊了",
];

/// Keyword sets for predicting where the caller is in their own script.
pub static STAGE_KEYWORDS: &[(&str, &[&str])] = &[
    ("opening", &["您好", "你好", "打扰", "请问是", "我是"]),
    ("presentation", &["介绍", "产品", "服务", "优惠", "活动", "套餐"]),
    ("objection_handling", &["但是", "可是", "不过", "其实", "放心"]),
    ("closing", &["办理", "考虑", "决定", "需要吗", "要不要", "现在就"]),
    ("termination", &["再见", "拜拜", "挂了", "不聊了"]),
];

/// Fixed final utterance per termination reason.
pub fn final_utterance(reason: &str) -> &'static str {
    match reason {
        "excessive_persistence" => "我已经说得很清楚了，请不要再打扰我。再见。",
        "max_duration_exceeded" => "很抱歉，我现在真的有事要忙，先挂了。",
        "ineffective_responses" => "看来我们的对话没有什么意义，就此结束吧。",
        "high_frustration" => "我觉得这个对话没有必要继续下去了。",
        "max_turns_exceeded" => "我们已经聊了很久了，我的立场不会改变。再见。",
        "explicit_termination" => "好的，再见。",
        _ => "好的，再见。",
    }
}

/// True when the text contains any phrase from the list.
pub fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| text.contains(p))
}

/// Phrases from the list found in the text.
pub fn matched_phrases(text: &str, phrases: &[&str]) -> Vec<String> {
    phrases
        .iter()
        .filter(|p| text.contains(*p))
        .map(|p| p.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_compile() {
        for (category, patterns) in COMPILED_PATTERNS.iter() {
            let lexicon = CATEGORY_LEXICONS
                .iter()
                .find(|l| l.category == *category)
                .unwrap();
            assert_eq!(patterns.len(), lexicon.patterns.len());
        }
    }

    #[test]
    fn test_loan_pattern_matches() {
        let (_, patterns) = COMPILED_PATTERNS
            .iter()
            .find(|(c, _)| *c == IntentCategory::LoanOffer)
            .unwrap();
        assert!(patterns.iter().any(|re| re.is_match("有贷款需求吗")));
    }

    #[test]
    fn test_goodbye_lexicon() {
        assert!(contains_any("好，再见", GOODBYE_PHRASES));
        assert!(!contains_any("我不需要贷款", GOODBYE_PHRASES));
    }

    #[test]
    fn test_matched_phrases() {
        let matched = matched_phrases("听我说，给个机会", PERSISTENCE_INDICATORS);
        assert!(matched.contains(&"听我说".to_string()));
        assert!(matched.contains(&"给个机会".to_string()));
    }

    #[test]
    fn test_final_utterances_non_empty() {
        for reason in [
            "excessive_persistence",
            "max_duration_exceeded",
            "ineffective_responses",
            "high_frustration",
            "max_turns_exceeded",
            "explicit_termination",
            "anything_else",
        ] {
            assert!(!final_utterance(reason).is_empty());
        }
    }
}
