//! End-to-end conversation flows against the in-memory store.
//!
//! The LLM is either absent (template-bank path) or a stub backend, so
//! nothing external is required.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use callguard_config::{EngineSettings, TextAnalyticsSettings};
use callguard_core::{
    CallStage, EmotionLabel, IntentCategory, PersonalityType, SpeechStyle, UserProfile,
};
use callguard_engine::manager::TurnRequest;
use callguard_engine::{
    ConversationManager, DialogueStateTracker, IntentClassifier, ResponseGenerator,
    SentimentAnalyzer, TerminationDecider,
};
use callguard_llm::{ChatBackend, GenerationOptions, GenerationResult, LlmError, Message};
use callguard_store::MemoryStore;

struct StubBackend;

#[async_trait]
impl ChatBackend for StubBackend {
    async fn generate(
        &self,
        _messages: &[Message],
        _options: &GenerationOptions,
    ) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult {
            text: "谢谢，我不需要这项服务。".to_string(),
            prompt_tokens: 80,
            completion_tokens: 10,
            total_time_ms: 3,
            finish_reason: callguard_llm::FinishReason::Stop,
        })
    }

    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

fn build_manager(backend: Option<Arc<dyn ChatBackend>>) -> ConversationManager {
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    let tracker = Arc::new(DialogueStateTracker::new(
        store.clone(),
        Duration::from_secs(7200),
    ));
    let classifier = Arc::new(IntentClassifier::new(
        store.clone(),
        Duration::from_secs(3600),
    ));
    let analyzer = Arc::new(SentimentAnalyzer::new(
        store.clone(),
        Duration::from_secs(1800),
        &TextAnalyticsSettings::default(),
    ));
    let generator = Arc::new(ResponseGenerator::new(
        backend,
        store.clone(),
        Duration::from_secs(3600),
        0.6,
    ));
    let decider = Arc::new(TerminationDecider::new(&EngineSettings::default()));

    ConversationManager::new(
        tracker,
        classifier,
        analyzer,
        generator,
        decider,
        Duration::from_millis(300),
    )
}

fn request(call_id: &str, text: &str, profile: Option<UserProfile>) -> TurnRequest {
    TurnRequest {
        call_id: call_id.to_string(),
        user_id: "user-1".to_string(),
        input_text: text.to_string(),
        caller_fingerprint: Some("fp-test".to_string()),
        user_profile: profile,
        spam_profile: None,
    }
}

fn polite_profile() -> UserProfile {
    UserProfile::new("user-1")
        .with_personality(PersonalityType::Polite)
        .with_speech_style(SpeechStyle::Normal)
}

#[tokio::test]
async fn test_first_turn_loan_pitch() {
    let manager = build_manager(None);

    let outcome = manager
        .process_turn(request(
            "call-1",
            "您好，我是银行的，有贷款需求吗？",
            Some(polite_profile()),
        ))
        .await
        .unwrap();

    assert_eq!(outcome.intent, IntentCategory::LoanOffer);
    assert!(
        outcome.confidence >= 0.6,
        "confidence {} below 0.6",
        outcome.confidence
    );
    assert_eq!(outcome.next_state, CallStage::HandlingLoan);
    assert!(!outcome.response.is_empty());
    assert!(!outcome.should_terminate);
    assert_eq!(outcome.turn_count, 1);
}

#[tokio::test]
async fn test_persistent_loan_caller_escalates() {
    let manager = build_manager(None);

    let pitches = [
        "我们这边做贷款，利息很低",
        "这个贷款放款很快",
        "贷款利率优惠",
        "这个贷款额度很高",
        "贷款这周申请有优惠",
    ];

    let mut outcomes = Vec::new();
    for pitch in pitches {
        let outcome = manager
            .process_turn(request("call-2", pitch, Some(polite_profile())))
            .await
            .unwrap();
        outcomes.push(outcome);
    }

    let stage_after = |i: usize| outcomes[i].next_state;
    assert_eq!(stage_after(2), CallStage::FirmRejection);
    assert!(!outcomes[2].should_terminate);
    assert!(outcomes[4].should_terminate);
    assert_eq!(
        outcomes[4].termination_reason.as_deref(),
        Some("explicit_termination")
    );

    // Stage reached hang-up warning on the fifth pitch before terminating.
    let summary = manager.conversation_summary("call-2").await.unwrap();
    assert_eq!(summary.caller_turns, 5);
}

#[tokio::test]
async fn test_goodbye_terminates_immediately() {
    let manager = build_manager(None);

    let outcome = manager
        .process_turn(request("call-3", "再见", Some(polite_profile())))
        .await
        .unwrap();

    assert_eq!(outcome.next_state, CallStage::CallEnd);
    assert!(outcome.should_terminate);
    assert_eq!(
        outcome.termination_reason.as_deref(),
        Some("explicit_termination")
    );
    assert!(!outcome.response.is_empty());
}

#[tokio::test]
async fn test_empty_text_still_answered() {
    let manager = build_manager(None);

    let outcome = manager
        .process_turn(request("call-4", "", Some(polite_profile())))
        .await
        .unwrap();

    assert_eq!(outcome.intent, IntentCategory::Unknown);
    assert_eq!(outcome.next_state, CallStage::Initial);
    assert!(!outcome.response.is_empty());
    assert!(!outcome.should_terminate);

    // The caller turn was recorded with a neutral emotion.
    let state = manager.tracker().snapshot("call-4").await.unwrap();
    assert_eq!(state.turns[0].emotion, Some(EmotionLabel::Neutral));
}

#[tokio::test]
async fn test_missing_call_id_rejected() {
    let manager = build_manager(None);

    let err = manager
        .process_turn(request("  ", "您好", Some(polite_profile())))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        callguard_engine::EngineError::InvalidInput(_)
    ));
}

#[tokio::test]
async fn test_max_turns_reached_with_live_generation() {
    let manager = build_manager(Some(Arc::new(StubBackend)));

    // Rotate categories and phrasing so no earlier rule fires.
    let turns = [
        "我们有产品促销活动",
        "另外还有贷款服务吗",
        "理财收益也很不错",
        "保险保障也可以做",
        "套餐流量升级优惠",
        "产品特价了解一下",
        "贷款利率也能谈",
        "理财产品考虑下",
    ];

    let mut last = None;
    for text in turns {
        let outcome = manager
            .process_turn(request("call-5", text, Some(polite_profile())))
            .await
            .unwrap();
        last = Some(outcome);
    }

    let last = last.unwrap();
    assert_eq!(last.turn_count, 8);
    assert!(last.should_terminate);
    assert_eq!(
        last.termination_reason.as_deref(),
        Some("max_turns_exceeded")
    );
}

#[tokio::test]
async fn test_second_update_after_end_is_rejected() {
    let manager = build_manager(None);

    manager
        .process_turn(request("call-6", "您好，有贷款需求吗", Some(polite_profile())))
        .await
        .unwrap();

    manager.end_call("call-6", "user_hangup").await.unwrap();

    let err = manager
        .process_turn(request("call-6", "还在吗", Some(polite_profile())))
        .await
        .unwrap_err();
    assert!(matches!(err, callguard_engine::EngineError::StateClosed(_)));
}

#[tokio::test]
async fn test_calls_are_independent() {
    let manager = Arc::new(build_manager(None));

    let a = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .process_turn(request("call-7a", "有贷款需求吗", None))
                .await
                .unwrap()
        })
    };
    let b = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .process_turn(request("call-7b", "股票基金投资，收益回报很高", None))
                .await
                .unwrap()
        })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert_eq!(a.turn_count, 1);
    assert_eq!(b.turn_count, 1);
    assert_eq!(a.next_state, CallStage::HandlingLoan);
    assert_eq!(b.next_state, CallStage::HandlingInvestment);
}
