//! Personality and emotion rewrite filters
//!
//! Small text rewrites applied after base generation: the personality
//! filter imprints the user's register, the emotion controller reacts to
//! the caller's tone. Rules are plain string substitutions over Mandarin
//! surface forms.

use callguard_core::PersonalityType;

/// Apply substitution rules in order. Existing soft forms are collapsed
/// first and each harsh form is marked before substitution, so nested
/// forms (不需要 contains 不要) rewrite correctly and the filter is
/// idempotent. Rules must list longer harsh forms first.
fn rewrite(text: &str, rules: &[(&str, &str)]) -> String {
    let mut result = text.to_string();
    for (harsh, soft) in rules {
        if soft.contains(harsh) {
            result = result.replace(soft, harsh);
        }
    }

    for (i, (harsh, _)) in rules.iter().enumerate() {
        let placeholder = char::from_u32(0xF000 + i as u32).expect("private use char");
        result = result.replace(harsh, &placeholder.to_string());
    }
    for (i, (_, soft)) in rules.iter().enumerate() {
        let placeholder = char::from_u32(0xF000 + i as u32).expect("private use char");
        result = result.replace(placeholder, soft);
    }
    result
}

/// Apply the personality rewrite rules.
pub fn apply_personality(text: &str, personality: PersonalityType) -> String {
    match personality {
        PersonalityType::Polite => rewrite(
            text,
            &[
                ("不需要", "暂时不需要"),
                ("不想", "暂时不想"),
                ("没兴趣", "不太感兴趣"),
                ("不要", "请不要"),
            ],
        ),
        PersonalityType::Direct => rewrite(
            text,
            &[
                ("暂时不需要", "不需要"),
                ("不太感兴趣", "不感兴趣"),
                ("可能", ""),
                ("也许", ""),
            ],
        ),
        PersonalityType::Humorous => {
            let lead_ins = ["哈哈，", "说笑了，", "开个玩笑，"];
            if lead_ins.iter().any(|l| text.contains(l)) {
                text.to_string()
            } else {
                format!("{}{}", lead_ins[0], text)
            }
        }
        PersonalityType::Professional => rewrite(
            text,
            &[
                ("不需要", "暂无此需求"),
                ("不感兴趣", "暂不考虑"),
                ("没有", "暂无"),
                ("我", "本人"),
            ],
        ),
    }
}

/// Adjust the response to the caller's emotional tone.
pub fn apply_emotion_control(text: &str, caller_tone: &str) -> String {
    match caller_tone {
        // Hostile caller: stay calm, drop hedges.
        "aggressive" => {
            let mut result = text.to_string();
            for hedge in ["可能", "也许", "或许", "暂时"] {
                result = result.replace(hedge, "");
            }
            result.replace("不太", "不")
        }
        // Pushy caller: skip the opening gratitude.
        "persistent" => text.replace("谢谢您的", "").replace("谢谢", ""),
        // Friendly caller: keep it warm.
        "friendly" => {
            if text.starts_with("谢谢") {
                text.to_string()
            } else {
                format!("谢谢您，{}", text)
            }
        }
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polite_softens() {
        let result = apply_personality("我不需要，不要再打了", PersonalityType::Polite);
        assert_eq!(result, "我暂时不需要，请不要再打了");
    }

    #[test]
    fn test_polite_idempotent() {
        let once = apply_personality("请不要再打了", PersonalityType::Polite);
        assert_eq!(once, "请不要再打了");

        let twice = apply_personality(
            &apply_personality("我不需要", PersonalityType::Polite),
            PersonalityType::Polite,
        );
        assert_eq!(twice, "我暂时不需要");
    }

    #[test]
    fn test_direct_strips_hedges() {
        let result = apply_personality("我可能暂时不需要", PersonalityType::Direct);
        assert_eq!(result, "我不需要");
    }

    #[test]
    fn test_humorous_lead_in() {
        let result = apply_personality("我不需要。", PersonalityType::Humorous);
        assert!(result.starts_with("哈哈，"));

        let again = apply_personality(&result, PersonalityType::Humorous);
        assert_eq!(again, result);
    }

    #[test]
    fn test_professional_register() {
        let result = apply_personality("我不需要", PersonalityType::Professional);
        assert_eq!(result, "本人暂无此需求");
    }

    #[test]
    fn test_aggressive_tone_drops_hedges() {
        let result = apply_emotion_control("我可能不太方便", "aggressive");
        assert_eq!(result, "我不方便");
    }

    #[test]
    fn test_persistent_tone_drops_gratitude() {
        let result = apply_emotion_control("谢谢您的介绍，我不需要", "persistent");
        assert!(!result.contains("谢谢"));
    }

    #[test]
    fn test_friendly_tone_adds_gratitude() {
        let result = apply_emotion_control("我不需要", "friendly");
        assert!(result.starts_with("谢谢您，"));

        let already = apply_emotion_control("谢谢您，我不需要", "friendly");
        assert!(!already.starts_with("谢谢您，谢谢"));
    }
}
