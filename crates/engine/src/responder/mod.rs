//! Personalized response generation
//!
//! Pipeline per turn: fingerprint cache lookup → prompt build → chat
//! completion (or template fallback) → personality filter → emotion
//! controller → post-analysis → confidence → cache write. Every failure
//! resolves to a deterministic template response; nothing propagates.

pub mod filters;
pub mod templates;

use std::sync::Arc;
use std::time::{Duration, Instant};

use callguard_core::{
    stable_fingerprint, AiResponse, DialogueState, EmotionLabel, IntentResult, ResponseStrategy,
    Speaker, SpamCategory, UserProfile,
};
use callguard_llm::{ChatBackend, GenerationOptions, Message};
use callguard_store::{KeyValueStore, TypedCache};

/// Hard ceiling on response length in characters.
const MAX_RESPONSE_CHARS: usize = 500;

/// Turn-count bucket width for the cache fingerprint.
const TURN_BUCKET: usize = 3;

/// How much conversation history enters the prompt.
const HISTORY_TURNS: usize = 6;

/// Strategy-driven response generator.
pub struct ResponseGenerator {
    backend: Option<Arc<dyn ChatBackend>>,
    cache: TypedCache<CachedResponse>,
    cache_confidence: f32,
}

/// Cached slice of a generated response. Identical fingerprints resolve to
/// the same text within the TTL.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CachedResponse {
    text: String,
    confidence: f32,
    strategy: ResponseStrategy,
    emotional_tone: EmotionLabel,
}

impl ResponseGenerator {
    pub fn new(
        backend: Option<Arc<dyn ChatBackend>>,
        store: Arc<dyn KeyValueStore>,
        cache_ttl: Duration,
        cache_confidence: f32,
    ) -> Self {
        Self {
            backend,
            cache: TypedCache::new(store, "response", cache_ttl),
            cache_confidence,
        }
    }

    /// Generate a response for the current turn.
    pub async fn generate(
        &self,
        strategy: ResponseStrategy,
        state: &DialogueState,
        profile: &UserProfile,
        intent: &IntentResult,
        spam_category: SpamCategory,
    ) -> AiResponse {
        let start = Instant::now();
        let caller_turns = state.caller_turns();

        let fingerprint = stable_fingerprint(&[
            strategy.as_str(),
            state.stage.as_str(),
            &(caller_turns / TURN_BUCKET).to_string(),
            profile.personality.as_str(),
            profile.speech_style.as_str(),
            spam_category.as_str(),
        ]);

        if let Some(cached) = self.cache.get(&fingerprint).await {
            metrics::counter!("callguard_response_cache_hits_total").increment(1);
            return AiResponse {
                text: cached.text,
                intent: intent.intent,
                confidence: cached.confidence,
                emotional_tone: cached.emotional_tone,
                strategy,
                should_terminate: Self::should_terminate(strategy, caller_turns),
                next_stage: strategy.next_stage(state.stage),
                generation_time_ms: start.elapsed().as_millis() as u64,
                cached: true,
                context_hash: fingerprint,
            };
        }

        let generated = match &self.backend {
            Some(backend) => {
                let messages = self.build_prompt(strategy, state, profile, intent);
                let options = Self::generation_options(profile);
                match backend.generate(&messages, &options).await {
                    Ok(result) if !result.text.trim().is_empty() => Some(result.text),
                    Ok(_) => {
                        tracing::warn!(strategy = %strategy, "empty completion, using template");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(strategy = %strategy, error = %e, "generation failed, using template");
                        None
                    }
                }
            }
            None => None,
        };

        let fallback = generated.is_none();
        let base = generated
            .unwrap_or_else(|| templates::pick(state.stage, spam_category, &fingerprint).to_string());

        let personalized = filters::apply_personality(&base, profile.personality);
        let adjusted = filters::apply_emotion_control(&personalized, &intent.emotional_tone);
        let text: String = adjusted.chars().take(MAX_RESPONSE_CHARS).collect();

        let confidence = if fallback {
            0.5
        } else {
            Self::confidence(strategy, intent)
        };

        // Fallback responses terminate earlier: with generation degraded
        // the safe choice is to wind the call down.
        let should_terminate = if fallback {
            strategy.is_terminal() || caller_turns > 6
        } else {
            Self::should_terminate(strategy, caller_turns)
        };

        let response = AiResponse {
            emotional_tone: Self::detect_tone(&text),
            text,
            intent: intent.intent,
            confidence,
            strategy,
            should_terminate,
            next_stage: strategy.next_stage(state.stage),
            generation_time_ms: start.elapsed().as_millis() as u64,
            cached: false,
            context_hash: fingerprint.clone(),
        };

        // Template output is already deterministic per fingerprint; only
        // live generations worth trusting are cached.
        if !fallback && response.confidence >= self.cache_confidence {
            self.cache
                .put(
                    &fingerprint,
                    &CachedResponse {
                        text: response.text.clone(),
                        confidence: response.confidence,
                        strategy,
                        emotional_tone: response.emotional_tone,
                    },
                )
                .await;
        }

        response
    }

    /// System message plus up to six role-tagged history turns plus the
    /// current caller utterance.
    fn build_prompt(
        &self,
        strategy: ResponseStrategy,
        state: &DialogueState,
        profile: &UserProfile,
        intent: &IntentResult,
    ) -> Vec<Message> {
        let name = profile.name.as_deref().unwrap_or("用户");
        let description = Self::strategy_description(strategy);

        let system = format!(
            "你是{name}的AI助手，正在替他们接听骚扰电话。\n\
             用户个性特征：\n\
             - 性格类型：{personality}\n\
             - 说话风格：{style}\n\
             当前情况：\n\
             - 来电类型：{intent}\n\
             - 对话阶段：{stage}\n\
             - 对话轮次：{turns}\n\
             - 来电者语气：{tone}\n\
             响应策略：{description}\n\
             要求：\n\
             1. 保持{personality}的性格特征\n\
             2. 使用{style}的语言风格\n\
             3. 回复长度：{length}字以内\n\
             4. 目标：{goal}\n\
             5. 语气：{strategy_tone}\n\
             6. 直接返回回复内容，不要包含解释或标记",
            name = name,
            personality = profile.personality.as_str(),
            style = profile.speech_style.as_str(),
            intent = intent.intent,
            stage = state.stage,
            turns = state.caller_turns(),
            tone = intent.emotional_tone,
            description = description,
            length = profile.speech_style.token_guideline(),
            goal = Self::strategy_goal(strategy),
            strategy_tone = Self::strategy_tone(strategy),
        );

        let mut messages = vec![Message::system(system)];

        let turns = state.turns.as_slice();
        let (history, current) = match turns.split_last() {
            Some((last, rest)) if last.speaker == Speaker::Caller => (rest, Some(last)),
            _ => (turns, None),
        };

        let start = history.len().saturating_sub(HISTORY_TURNS);
        for turn in &history[start..] {
            messages.push(match turn.speaker {
                Speaker::Caller => Message::user(&turn.text),
                Speaker::Ai => Message::assistant(&turn.text),
            });
        }

        if let Some(current) = current {
            messages.push(Message::user(&current.text));
        }

        messages
    }

    /// Sampling parameters derived from the profile: humour runs hotter,
    /// professionalism cooler, and the speech style caps tokens.
    fn generation_options(profile: &UserProfile) -> GenerationOptions {
        use callguard_core::PersonalityType::*;

        let temperature = match profile.personality {
            Humorous => 0.9,
            Professional => 0.5,
            Polite | Direct => 0.7,
        };

        GenerationOptions {
            temperature: Some(temperature),
            max_tokens: Some(profile.speech_style.token_guideline()),
            stop: vec!["\n\n".to_string(), "USER:".to_string(), "AI:".to_string()],
            ..Default::default()
        }
    }

    fn confidence(strategy: ResponseStrategy, intent: &IntentResult) -> f32 {
        let mut confidence = (0.8 + intent.confidence) / 2.0;
        if strategy.is_terminal() {
            confidence += 0.1;
        }
        confidence.clamp(0.0, 1.0)
    }

    // The turn cap here sits one turn past the termination decider's so
    // the decider reports the precise reason; this flag is the backstop.
    fn should_terminate(strategy: ResponseStrategy, caller_turns: usize) -> bool {
        strategy.is_terminal() || caller_turns > 8
    }

    /// Emotional tone of the final text from lexical markers.
    fn detect_tone(text: &str) -> EmotionLabel {
        if ["警告", "投诉", "骚扰"].iter().any(|w| text.contains(w)) {
            EmotionLabel::Aggressive
        } else if ["坚决", "明确", "停止", "不要再"].iter().any(|w| text.contains(w)) {
            EmotionLabel::Firm
        } else if ["哈哈", "开玩笑", "有趣", "说笑"].iter().any(|w| text.contains(w)) {
            EmotionLabel::Friendly
        } else if ["抱歉", "不好意思", "谢谢"].iter().any(|w| text.contains(w)) {
            EmotionLabel::Polite
        } else {
            EmotionLabel::Neutral
        }
    }

    fn strategy_description(strategy: ResponseStrategy) -> &'static str {
        match strategy {
            ResponseStrategy::GentleDecline => "礼貌委婉地拒绝",
            ResponseStrategy::FirmDecline => "坚决明确地拒绝",
            ResponseStrategy::WittyResponse => "用幽默化解尴尬",
            ResponseStrategy::ExplainNotInterested => "解释为什么不感兴趣",
            ResponseStrategy::ClearRefusal => "清晰直接地拒绝",
            ResponseStrategy::DeflectWithHumor => "用幽默转移话题",
            ResponseStrategy::ProfessionalResponse => "专业理性地回应",
            ResponseStrategy::FinalWarning => "最后警告",
            ResponseStrategy::ImmediateHangup => "立即结束对话",
        }
    }

    fn strategy_goal(strategy: ResponseStrategy) -> &'static str {
        match strategy {
            ResponseStrategy::GentleDecline => "让对方理解你的立场，但不伤害感情",
            ResponseStrategy::FirmDecline => "明确表达拒绝，不留余地",
            ResponseStrategy::WittyResponse => "缓和气氛，轻松结束对话",
            ResponseStrategy::ExplainNotInterested => "理性说明原因，让对方接受",
            ResponseStrategy::ClearRefusal => "直接拒绝，节省双方时间",
            ResponseStrategy::DeflectWithHumor => "转移注意力，避免正面冲突",
            ResponseStrategy::ProfessionalResponse => "展现专业素养，理性沟通",
            ResponseStrategy::FinalWarning => "严肃警告，准备结束",
            ResponseStrategy::ImmediateHangup => "立即结束对话",
        }
    }

    fn strategy_tone(strategy: ResponseStrategy) -> &'static str {
        match strategy {
            ResponseStrategy::GentleDecline => "温和友善",
            ResponseStrategy::FirmDecline => "坚定严肃",
            ResponseStrategy::WittyResponse => "轻松幽默",
            ResponseStrategy::ExplainNotInterested => "理性平和",
            ResponseStrategy::ClearRefusal => "直接明确",
            ResponseStrategy::DeflectWithHumor => "诙谐有趣",
            ResponseStrategy::ProfessionalResponse => "专业冷静",
            ResponseStrategy::FinalWarning => "严肃警告",
            ResponseStrategy::ImmediateHangup => "果断终止",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callguard_core::{IntentCategory, PersonalityType, SpeechStyle, TurnRecord};
    use callguard_llm::{FinishReason, GenerationResult, LlmError};
    use callguard_store::MemoryStore;
    use parking_lot::Mutex;

    struct StubBackend {
        reply: Option<String>,
        calls: Mutex<usize>,
    }

    impl StubBackend {
        fn ok(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                calls: Mutex::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for StubBackend {
        async fn generate(
            &self,
            _messages: &[Message],
            _options: &GenerationOptions,
        ) -> Result<GenerationResult, LlmError> {
            *self.calls.lock() += 1;
            match &self.reply {
                Some(reply) => Ok(GenerationResult {
                    text: reply.clone(),
                    prompt_tokens: 50,
                    completion_tokens: 12,
                    total_time_ms: 4,
                    finish_reason: FinishReason::Stop,
                }),
                None => Err(LlmError::Timeout),
            }
        }

        async fn is_available(&self) -> bool {
            self.reply.is_some()
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn state_with_pitch() -> DialogueState {
        let mut state = DialogueState::new("c1", "u1", "fp");
        state.record(TurnRecord::caller("您好，有贷款需求吗"));
        state.intent_history.push(IntentCategory::LoanOffer);
        state.stage = callguard_core::CallStage::HandlingLoan;
        state
    }

    fn intent_result() -> IntentResult {
        IntentResult {
            intent: IntentCategory::LoanOffer,
            confidence: 0.8,
            sub_category: None,
            emotional_tone: "neutral".to_string(),
            keywords_matched: vec!["贷款".to_string()],
            context_influenced: false,
        }
    }

    fn profile() -> UserProfile {
        UserProfile::new("u1")
            .with_personality(PersonalityType::Polite)
            .with_speech_style(SpeechStyle::Normal)
    }

    fn generator(backend: Option<Arc<dyn ChatBackend>>) -> ResponseGenerator {
        ResponseGenerator::new(
            backend,
            Arc::new(MemoryStore::new()),
            Duration::from_secs(3600),
            0.6,
        )
    }

    #[tokio::test]
    async fn test_identical_fingerprints_share_text() {
        let stub = Arc::new(StubBackend::ok("我暂时不需要贷款，谢谢。"));
        let generator = generator(Some(stub.clone()));
        let state = state_with_pitch();

        let first = generator
            .generate(
                ResponseStrategy::ExplainNotInterested,
                &state,
                &profile(),
                &intent_result(),
                SpamCategory::Loan,
            )
            .await;
        let second = generator
            .generate(
                ResponseStrategy::ExplainNotInterested,
                &state,
                &profile(),
                &intent_result(),
                SpamCategory::Loan,
            )
            .await;

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.text, second.text);
        assert_eq!(first.context_hash, second.context_hash);
        // The backend only ran once.
        assert_eq!(*stub.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_template() {
        let generator = generator(Some(Arc::new(StubBackend::failing())));
        let state = state_with_pitch();

        let response = generator
            .generate(
                ResponseStrategy::ExplainNotInterested,
                &state,
                &profile(),
                &intent_result(),
                SpamCategory::Loan,
            )
            .await;

        assert!(!response.text.is_empty());
        assert!(!response.cached);
        assert_eq!(response.confidence, 0.5);

        // Fallbacks stay uncached: a repeat is still cached=false with the
        // same deterministic text.
        let again = generator
            .generate(
                ResponseStrategy::ExplainNotInterested,
                &state,
                &profile(),
                &intent_result(),
                SpamCategory::Loan,
            )
            .await;
        assert!(!again.cached);
        assert_eq!(response.text, again.text);
    }

    #[tokio::test]
    async fn test_no_backend_uses_template_bank() {
        let generator = generator(None);
        let state = state_with_pitch();

        let response = generator
            .generate(
                ResponseStrategy::ExplainNotInterested,
                &state,
                &profile(),
                &intent_result(),
                SpamCategory::Loan,
            )
            .await;
        assert!(!response.text.is_empty());
        assert_eq!(response.confidence, 0.5);
        assert!(!response.should_terminate);
    }

    #[tokio::test]
    async fn test_terminal_strategy_terminates() {
        let generator = generator(None);
        let state = state_with_pitch();

        let response = generator
            .generate(
                ResponseStrategy::ImmediateHangup,
                &state,
                &profile(),
                &intent_result(),
                SpamCategory::Loan,
            )
            .await;
        assert!(response.should_terminate);
        assert_eq!(response.next_stage, callguard_core::CallStage::CallEnd);
    }

    #[tokio::test]
    async fn test_output_ceiling() {
        let long_reply = "不需要。".repeat(500);
        let generator = generator(Some(Arc::new(StubBackend::ok(&long_reply))));
        let state = state_with_pitch();

        let response = generator
            .generate(
                ResponseStrategy::ClearRefusal,
                &state,
                &profile(),
                &intent_result(),
                SpamCategory::Loan,
            )
            .await;
        assert!(response.text.chars().count() <= MAX_RESPONSE_CHARS);
    }

    #[tokio::test]
    async fn test_prompt_shape() {
        let generator = generator(None);
        let mut state = state_with_pitch();
        for i in 0..5 {
            state.record(TurnRecord::ai(format!("回复{}", i)));
            state.record(TurnRecord::caller(format!("再考虑一下{}", i)));
        }

        let messages = generator.build_prompt(
            ResponseStrategy::ExplainNotInterested,
            &state,
            &profile(),
            &intent_result(),
        );

        assert_eq!(messages[0].role, callguard_llm::Role::System);
        assert!(messages[0].content.contains("polite"));
        // System + at most six history turns + the current utterance.
        assert!(messages.len() <= 8);
        assert_eq!(messages.last().unwrap().role, callguard_llm::Role::User);
    }

    #[tokio::test]
    async fn test_humorous_profile_gets_lead_in() {
        let stub = Arc::new(StubBackend::ok("我不需要。"));
        let generator = generator(Some(stub));
        let state = state_with_pitch();
        let profile = UserProfile::new("u1").with_personality(PersonalityType::Humorous);

        let response = generator
            .generate(
                ResponseStrategy::DeflectWithHumor,
                &state,
                &profile,
                &intent_result(),
                SpamCategory::Loan,
            )
            .await;
        assert!(response.text.starts_with("哈哈，"));
        assert_eq!(response.emotional_tone, EmotionLabel::Friendly);
    }
}
