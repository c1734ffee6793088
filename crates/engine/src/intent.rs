//! Multi-layer intent classification
//!
//! Three independent layers each produce a provisional result over the
//! same utterance:
//! - keyword: lexicon + regex matching with per-category priors
//! - semantic: a fixed-length feature vector compared against per-category
//!   reference vectors by cosine similarity
//! - contextual: the dominant intent of the recent conversation history
//!
//! Results are fused by weighted vote. The whole fused result is cached by
//! utterance hash; a hit bypasses every layer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use callguard_core::{
    text_hash, DialogueState, IntentCategory, IntentResult, SpamCategory, SpamProfile,
};
use callguard_store::{KeyValueStore, TypedCache};

use crate::lexicon::{
    self, CATEGORY_LEXICONS, COMPILED_PATTERNS, SUB_CATEGORY_KEYWORDS,
};

/// Fusion weights per layer.
const KEYWORD_WEIGHT: f32 = 0.3;
const SEMANTIC_WEIGHT: f32 = 0.4;
const CONTEXT_WEIGHT: f32 = 0.3;

/// Keyword/pattern ratios saturate at these match counts; a short pitch
/// with a couple of on-topic words scores like a long one.
const KEYWORD_SATURATION: f32 = 3.0;
const PATTERN_SATURATION: f32 = 2.0;

/// Context layer only participates with at least this many prior intents.
const CONTEXT_MIN_INTENTS: usize = 3;
const CONTEXT_CONSISTENCY: f32 = 0.7;

/// Fixed per-category reference vectors for the semantic layer. Dimensions:
/// [length, sales density, loan density, investment density, insurance
/// density, telecom density].
const REFERENCE_VECTORS: [(IntentCategory, [f32; 6]); 5] = [
    (IntentCategory::SalesCall, [0.8, 0.9, 0.2, 0.3, 0.2, 0.2]),
    (IntentCategory::LoanOffer, [0.2, 0.2, 0.9, 0.3, 0.1, 0.2]),
    (
        IntentCategory::InvestmentPitch,
        [0.3, 0.3, 0.4, 0.9, 0.2, 0.2],
    ),
    (
        IntentCategory::InsuranceSales,
        [0.1, 0.2, 0.3, 0.2, 0.9, 0.2],
    ),
    (IntentCategory::TelecomOffer, [0.4, 0.3, 0.1, 0.2, 0.2, 0.9]),
];

#[derive(Debug, Clone)]
struct LayerResult {
    intent: IntentCategory,
    confidence: f32,
    sub_category: Option<String>,
    keywords: Vec<String>,
    context_influenced: bool,
}

/// Recorded high-confidence misclassification, consumed by the learning
/// system.
#[derive(Debug, Clone)]
pub struct MisclassificationRecord {
    pub text_sample: String,
    pub predicted: IntentCategory,
    pub correct: IntentCategory,
    pub confidence: f32,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct ClassifierStats {
    total: u64,
    correct: u64,
}

/// Multi-layer intent classifier.
pub struct IntentClassifier {
    cache: TypedCache<IntentResult>,
    stats: Mutex<ClassifierStats>,
    misclassifications: Mutex<Vec<MisclassificationRecord>>,
}

impl IntentClassifier {
    pub fn new(store: Arc<dyn KeyValueStore>, cache_ttl: Duration) -> Self {
        Self {
            cache: TypedCache::new(store, "intent", cache_ttl),
            stats: Mutex::new(ClassifierStats::default()),
            misclassifications: Mutex::new(Vec::new()),
        }
    }

    /// Classify a caller utterance. Context and spam profile are optional
    /// refinements; an empty utterance is unknown.
    pub async fn classify(
        &self,
        text: &str,
        context: Option<&DialogueState>,
        spam_profile: Option<&SpamProfile>,
    ) -> IntentResult {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return IntentResult::unknown();
        }

        let fingerprint = text_hash(trimmed);
        if let Some(cached) = self.cache.get(&fingerprint).await {
            metrics::counter!("callguard_intent_cache_hits_total").increment(1);
            return cached;
        }

        let mut layers: Vec<(LayerResult, f32)> = Vec::with_capacity(3);
        layers.push((self.keyword_layer(trimmed, spam_profile), KEYWORD_WEIGHT));
        layers.push((self.semantic_layer(trimmed), SEMANTIC_WEIGHT));
        if let Some(contextual) = context.and_then(|c| self.contextual_layer(c)) {
            layers.push((contextual, CONTEXT_WEIGHT));
        }

        let result = self.fuse(&layers, trimmed);
        self.cache.put(&fingerprint, &result).await;

        metrics::counter!("callguard_intent_classifications_total").increment(1);
        tracing::debug!(
            intent = %result.intent,
            confidence = result.confidence,
            context_influenced = result.context_influenced,
            "intent classified"
        );

        result
    }

    /// Keyword layer: lexicon and regex matching. The per-category prior
    /// picks the winner; confidence reflects match strength alone.
    fn keyword_layer(&self, text: &str, spam_profile: Option<&SpamProfile>) -> LayerResult {
        let lowered = text.to_lowercase();
        let mut best_score = 0.0f32;
        let mut best_raw = 0.0f32;
        let mut winner = IntentCategory::Unknown;
        let mut matched_keywords = Vec::new();
        let mut sub_category = None;

        for lex in CATEGORY_LEXICONS.iter() {
            let keyword_matches: Vec<String> = lex
                .keywords
                .iter()
                .filter(|kw| lowered.contains(*kw))
                .map(|kw| kw.to_string())
                .collect();

            let pattern_matches = COMPILED_PATTERNS
                .iter()
                .find(|(c, _)| *c == lex.category)
                .map(|(_, patterns)| patterns.iter().filter(|re| re.is_match(&lowered)).count())
                .unwrap_or(0);

            let keyword_ratio = (keyword_matches.len() as f32 / KEYWORD_SATURATION).min(1.0);
            let pattern_ratio = (pattern_matches as f32 / PATTERN_SATURATION).min(1.0);
            let raw = 0.6 * keyword_ratio + 0.4 * pattern_ratio;

            let prior = lex.weight * Self::spam_prior_boost(lex.category, spam_profile);
            let weighted = raw * prior;

            if weighted > best_score {
                best_score = weighted;
                best_raw = raw;
                winner = lex.category;
                matched_keywords = keyword_matches;
                sub_category = if raw > 0.3 {
                    Self::sub_category(&lowered, lex.sub_categories)
                } else {
                    None
                };
            }
        }

        LayerResult {
            intent: winner,
            confidence: (1.5 * best_raw).min(1.0),
            sub_category,
            keywords: matched_keywords,
            context_influenced: false,
        }
    }

    /// A spam profile matching the category raises its prior in proportion
    /// to the recorded risk.
    fn spam_prior_boost(category: IntentCategory, spam_profile: Option<&SpamProfile>) -> f32 {
        let Some(profile) = spam_profile else {
            return 1.0;
        };
        let matches = matches!(
            (profile.category, category),
            (SpamCategory::Sales, IntentCategory::SalesCall)
                | (SpamCategory::Loan, IntentCategory::LoanOffer)
                | (SpamCategory::Investment, IntentCategory::InvestmentPitch)
                | (SpamCategory::Insurance, IntentCategory::InsuranceSales)
                | (SpamCategory::Telecom, IntentCategory::TelecomOffer)
        );
        if matches {
            1.0 + 0.5 * profile.risk_score.clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    fn sub_category(text: &str, sub_categories: &[&str]) -> Option<String> {
        for sub in sub_categories {
            if let Some((_, keywords)) = SUB_CATEGORY_KEYWORDS.iter().find(|(name, _)| name == sub)
            {
                if keywords.iter().any(|kw| text.contains(kw)) {
                    return Some(sub.to_string());
                }
            }
        }
        None
    }

    /// Semantic layer: reduce the utterance to a feature vector and pick
    /// the category whose reference vector is most similar.
    fn semantic_layer(&self, text: &str) -> LayerResult {
        let features = Self::feature_vector(text);

        // Without any category density the vector is pure length and the
        // similarity would be an artifact; report unknown instead.
        if features[1..].iter().all(|d| *d == 0.0) {
            return LayerResult {
                intent: IntentCategory::Unknown,
                confidence: 0.0,
                sub_category: None,
                keywords: Vec::new(),
                context_influenced: false,
            };
        }

        let mut winner = IntentCategory::Unknown;
        let mut best = 0.0f32;
        for (category, reference) in REFERENCE_VECTORS.iter() {
            let similarity = Self::cosine_similarity(&features, reference);
            if similarity > best {
                best = similarity;
                winner = *category;
            }
        }

        LayerResult {
            intent: winner,
            confidence: best,
            sub_category: None,
            keywords: Vec::new(),
            context_influenced: false,
        }
    }

    fn feature_vector(text: &str) -> [f32; 6] {
        let lowered = text.to_lowercase();
        let length = (text.chars().count() as f32 / 100.0).min(1.0);

        let mut features = [length, 0.0, 0.0, 0.0, 0.0, 0.0];
        for (idx, lex) in CATEGORY_LEXICONS.iter().enumerate() {
            let matches = lex.keywords.iter().filter(|kw| lowered.contains(*kw)).count();
            features[idx + 1] = matches as f32 / lex.keywords.len() as f32;
        }
        features
    }

    fn cosine_similarity(a: &[f32; 6], b: &[f32; 6]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }

    /// Contextual layer: with three or more prior intents, report the most
    /// frequent recent one — at full confidence when dominant, dampened
    /// otherwise.
    fn contextual_layer(&self, context: &DialogueState) -> Option<LayerResult> {
        if context.intent_history.len() < CONTEXT_MIN_INTENTS {
            return None;
        }

        let recent = context.recent_intents(5);
        let known: Vec<IntentCategory> =
            recent.iter().copied().filter(|i| i.is_known()).collect();
        if known.is_empty() {
            return None;
        }

        let mut counts: Vec<(IntentCategory, usize)> = Vec::new();
        for intent in &known {
            match counts.iter_mut().find(|(i, _)| i == intent) {
                Some((_, count)) => *count += 1,
                None => counts.push((*intent, 1)),
            }
        }
        let (dominant, count) = counts.into_iter().max_by_key(|(_, c)| *c)?;
        let share = count as f32 / recent.len() as f32;

        let confidence = if share >= CONTEXT_CONSISTENCY {
            share
        } else {
            0.8 * share
        };

        Some(LayerResult {
            intent: dominant,
            confidence,
            sub_category: None,
            keywords: Vec::new(),
            context_influenced: true,
        })
    }

    /// Weighted vote across layers. The denominator is the weight of the
    /// layers that participated, so a missing context layer does not
    /// depress confidence.
    fn fuse(&self, layers: &[(LayerResult, f32)], text: &str) -> IntentResult {
        let mut scores: Vec<(IntentCategory, f32)> = Vec::new();
        let mut weight_sum = 0.0f32;
        let mut keywords: Vec<String> = Vec::new();
        let mut sub_category = None;
        let mut context_influenced = false;

        for (layer, weight) in layers {
            weight_sum += weight;
            if !layer.intent.is_known() {
                continue;
            }

            match scores.iter_mut().find(|(i, _)| *i == layer.intent) {
                Some((_, score)) => *score += layer.confidence * weight,
                None => scores.push((layer.intent, layer.confidence * weight)),
            }

            for kw in &layer.keywords {
                if !keywords.contains(kw) {
                    keywords.push(kw.clone());
                }
            }
            if sub_category.is_none() {
                sub_category = layer.sub_category.clone();
            }
            context_influenced |= layer.context_influenced;
        }

        let Some((intent, score)) = scores
            .into_iter()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        else {
            return IntentResult {
                emotional_tone: Self::emotional_tone(text).to_string(),
                ..IntentResult::unknown()
            };
        };

        IntentResult {
            intent,
            confidence: (score / weight_sum.max(f32::EPSILON)).clamp(0.0, 1.0),
            sub_category,
            emotional_tone: Self::emotional_tone(text).to_string(),
            keywords_matched: keywords,
            context_influenced,
        }
    }

    /// Tone hint from fixed lexicons; highest count above the threshold
    /// wins, aggression first.
    fn emotional_tone(text: &str) -> &'static str {
        let aggressive = lexicon::AGGRESSIVE_TONE
            .iter()
            .filter(|w| text.contains(*w))
            .count();
        let persistent = lexicon::PERSISTENT_TONE
            .iter()
            .filter(|w| text.contains(*w))
            .count();
        let friendly = lexicon::FRIENDLY_TONE
            .iter()
            .filter(|w| text.contains(*w))
            .count();

        if aggressive > 2 {
            "aggressive"
        } else if persistent > 2 {
            "persistent"
        } else if friendly > 2 {
            "friendly"
        } else {
            "neutral"
        }
    }

    /// Record a classification outcome. A confident wrong prediction is
    /// kept for the learning system.
    pub fn learn_from_feedback(
        &self,
        text: &str,
        predicted: IntentCategory,
        correct: IntentCategory,
        confidence: f32,
    ) {
        {
            let mut stats = self.stats.lock();
            stats.total += 1;
            if predicted == correct {
                stats.correct += 1;
            }
        }

        if predicted != correct && confidence >= 0.8 {
            let sample: String = text.chars().take(50).collect();
            tracing::warn!(
                predicted = %predicted,
                correct = %correct,
                confidence,
                text_sample = %sample,
                "high confidence misclassification"
            );
            self.misclassifications.lock().push(MisclassificationRecord {
                text_sample: sample,
                predicted,
                correct,
                confidence,
                at: Utc::now(),
            });
        }
    }

    /// Observed accuracy over feedback samples.
    pub fn accuracy(&self) -> f32 {
        let stats = self.stats.lock();
        if stats.total == 0 {
            return 1.0;
        }
        stats.correct as f32 / stats.total as f32
    }

    /// Drain recorded misclassifications (learning system input).
    pub fn take_misclassifications(&self) -> Vec<MisclassificationRecord> {
        std::mem::take(&mut *self.misclassifications.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callguard_store::MemoryStore;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(Arc::new(MemoryStore::new()), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_loan_pitch_classified_with_confidence() {
        let classifier = classifier();
        let result = classifier
            .classify("您好，我是银行的，有贷款需求吗？", None, None)
            .await;
        assert_eq!(result.intent, IntentCategory::LoanOffer);
        assert!(
            result.confidence >= 0.6,
            "confidence {} below 0.6",
            result.confidence
        );
        assert!(result.keywords_matched.iter().any(|k| k == "贷款"));
    }

    #[tokio::test]
    async fn test_empty_text_is_unknown() {
        let classifier = classifier();
        let result = classifier.classify("   ", None, None).await;
        assert_eq!(result.intent, IntentCategory::Unknown);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_investment_pitch() {
        let classifier = classifier();
        let result = classifier
            .classify("我们有一个理财产品，收益很高，要不要了解投资机会", None, None)
            .await;
        assert_eq!(result.intent, IntentCategory::InvestmentPitch);
        assert!(result.confidence > 0.3);
    }

    #[tokio::test]
    async fn test_cache_returns_identical_result() {
        let classifier = classifier();
        let text = "推荐一个特价产品给您";
        let first = classifier.classify(text, None, None).await;
        let second = classifier.classify(text, None, None).await;
        assert_eq!(first.intent, second.intent);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.keywords_matched, second.keywords_matched);
    }

    #[tokio::test]
    async fn test_context_layer_consistency() {
        let classifier = classifier();
        let mut state = callguard_core::DialogueState::new("c1", "u1", "fp");
        state.intent_history = vec![
            IntentCategory::LoanOffer,
            IntentCategory::LoanOffer,
            IntentCategory::LoanOffer,
            IntentCategory::LoanOffer,
        ];

        // Ambiguous text alone, but the context pins it.
        let result = classifier.classify("考虑得怎么样了", Some(&state), None).await;
        assert!(result.context_influenced);
        assert_eq!(result.intent, IntentCategory::LoanOffer);
    }

    #[tokio::test]
    async fn test_spam_profile_boosts_matching_category() {
        let classifier = classifier();
        let mut profile =
            callguard_core::SpamProfile::new("fp", callguard_core::SpamCategory::Insurance);
        profile.risk_score = 1.0;

        // 保障 appears in the insurance lexicon.
        let without = classifier.classify("为家人加一份保障", None, None).await;
        let with = classifier
            .classify("为家人加一份保障吧", None, Some(&profile))
            .await;
        assert_eq!(with.intent, IntentCategory::InsuranceSales);
        let _ = without;
    }

    #[tokio::test]
    async fn test_sub_category() {
        let classifier = classifier();
        let result = classifier
            .classify("信用卡分期，额度很高，快速审批放款", None, None)
            .await;
        assert_eq!(result.intent, IntentCategory::LoanOffer);
        assert_eq!(result.sub_category.as_deref(), Some("credit_card"));
    }

    #[test]
    fn test_feedback_records_high_confidence_misses() {
        let classifier = classifier();
        classifier.learn_from_feedback(
            "套餐升级",
            IntentCategory::SalesCall,
            IntentCategory::TelecomOffer,
            0.9,
        );
        classifier.learn_from_feedback(
            "贷款",
            IntentCategory::LoanOffer,
            IntentCategory::LoanOffer,
            0.9,
        );

        let records = classifier.take_misclassifications();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correct, IntentCategory::TelecomOffer);
        assert!(classifier.accuracy() < 1.0);
        assert!(classifier.take_misclassifications().is_empty());
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let b = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!((IntentClassifier::cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);

        let zero = [0.0; 6];
        assert_eq!(IntentClassifier::cosine_similarity(&a, &zero), 0.0);
    }
}
