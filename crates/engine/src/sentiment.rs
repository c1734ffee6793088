//! Sentiment and emotion analysis
//!
//! Backends are tried in order, stopping at the first success:
//! 1. a local model behind a readiness gate (requests route past it until
//!    `ready()` reports true)
//! 2. the remote text-analytics endpoint
//! 3. lexicon scoring (infallible)
//!
//! The whole analysis is cached by text hash. If every backend fails the
//! analyzer returns a fully-neutral analysis with confidence 0.5 — never an
//! error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use callguard_core::{
    text_hash, AnalysisSource, ConversationAnalysis, EmotionAssessment, EmotionLabel, SalesStage,
    SentimentAssessment, SentimentLabel,
};
use callguard_config::TextAnalyticsSettings;
use callguard_store::{KeyValueStore, TypedCache};

use crate::lexicon;

/// Local inference backend. Implementations load weights off the request
/// path and flip `ready()` once warm.
#[async_trait]
pub trait LocalSentimentModel: Send + Sync {
    /// Whether warmup has completed. Until then the analyzer skips this
    /// backend entirely.
    fn ready(&self) -> bool;

    async fn analyze(
        &self,
        text: &str,
    ) -> Result<(SentimentAssessment, EmotionAssessment), String>;
}

/// Sentiment/emotion analyzer with a backend fallback chain.
pub struct SentimentAnalyzer {
    local: Option<Arc<dyn LocalSentimentModel>>,
    remote: Option<RemoteSentimentClient>,
    cache: TypedCache<ConversationAnalysis>,
}

impl SentimentAnalyzer {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        cache_ttl: Duration,
        remote_settings: &TextAnalyticsSettings,
    ) -> Self {
        let remote = if remote_settings.enabled {
            match RemoteSentimentClient::new(remote_settings) {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::warn!(error = %e, "remote sentiment client unavailable");
                    None
                }
            }
        } else {
            None
        };

        Self {
            local: None,
            remote,
            cache: TypedCache::new(store, "sentiment", cache_ttl),
        }
    }

    /// Inject a local model (tests, on-device deployments).
    pub fn with_local_model(mut self, model: Arc<dyn LocalSentimentModel>) -> Self {
        self.local = Some(model);
        self
    }

    /// Whether at least the lexicon path is serviceable. Always true; the
    /// readiness endpoint reports backend availability separately.
    pub fn ready(&self) -> bool {
        true
    }

    /// Analyze one utterance.
    pub async fn analyze(&self, text: &str) -> ConversationAnalysis {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ConversationAnalysis::neutral_fallback();
        }

        let fingerprint = text_hash(trimmed);
        if let Some(cached) = self.cache.get(&fingerprint).await {
            metrics::counter!("callguard_sentiment_cache_hits_total").increment(1);
            return cached;
        }

        let analysis = self.run_backends(trimmed).await;
        self.cache.put(&fingerprint, &analysis).await;
        analysis
    }

    async fn run_backends(&self, text: &str) -> ConversationAnalysis {
        if let Some(local) = self.local.as_ref().filter(|m| m.ready()) {
            match local.analyze(text).await {
                Ok((sentiment, emotion)) => {
                    return self.assemble(text, sentiment, emotion, AnalysisSource::Local);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "local sentiment model failed");
                }
            }
        }

        if let Some(remote) = &self.remote {
            match remote.analyze(text).await {
                Ok(sentiment) => {
                    // The endpoint only does document sentiment; the
                    // emotion comes from lexicon scoring, falling back to
                    // the sentiment mapping when nothing matches.
                    let emotion = Self::lexicon_emotion(text)
                        .unwrap_or_else(|| Self::emotion_from_sentiment(&sentiment));
                    return self.assemble(text, sentiment, emotion, AnalysisSource::Remote);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "remote sentiment analysis failed");
                }
            }
        }

        match Self::lexicon_backend(text) {
            Some((sentiment, emotion)) => {
                self.assemble(text, sentiment, emotion, AnalysisSource::Lexicon)
            }
            None => ConversationAnalysis::neutral_fallback(),
        }
    }

    /// Lexicon scoring: `min(1, 0.3 + 0.2·matches)` per emotion, ties
    /// broken by declaration order.
    fn lexicon_emotion(text: &str) -> Option<EmotionAssessment> {
        let mut scores: HashMap<EmotionLabel, f32> = HashMap::new();
        let mut primary = None;
        let mut best = 0.0f32;

        for (emotion, patterns) in lexicon::EMOTION_PATTERNS {
            let matches = patterns.iter().filter(|p| text.contains(*p)).count();
            if matches == 0 {
                continue;
            }
            let score = (0.3 + 0.2 * matches as f32).min(1.0);
            scores.insert(*emotion, score);
            if score > best {
                best = score;
                primary = Some(*emotion);
            }
        }

        primary.map(|primary| EmotionAssessment {
            primary,
            confidence: best,
            scores,
        })
    }

    fn lexicon_backend(text: &str) -> Option<(SentimentAssessment, EmotionAssessment)> {
        let emotion = Self::lexicon_emotion(text).unwrap_or_else(|| EmotionAssessment {
            primary: EmotionLabel::Neutral,
            confidence: 0.5,
            scores: HashMap::new(),
        });

        let label = match emotion.primary {
            EmotionLabel::Friendly
            | EmotionLabel::Joy
            | EmotionLabel::Patient
            | EmotionLabel::Polite => SentimentLabel::Positive,
            e if e.escalation_rank() >= 5 => SentimentLabel::Negative,
            _ => SentimentLabel::Neutral,
        };

        let sentiment = SentimentAssessment {
            label,
            confidence: emotion.confidence,
            scores: HashMap::from([(label, emotion.confidence)]),
        };
        Some((sentiment, emotion))
    }

    fn emotion_from_sentiment(sentiment: &SentimentAssessment) -> EmotionAssessment {
        let primary = match sentiment.label {
            SentimentLabel::Positive => EmotionLabel::Friendly,
            SentimentLabel::Negative => EmotionLabel::Annoyed,
            SentimentLabel::Neutral => EmotionLabel::Neutral,
        };
        EmotionAssessment {
            primary,
            confidence: sentiment.confidence,
            scores: HashMap::from([(primary, sentiment.confidence)]),
        }
    }

    fn assemble(
        &self,
        text: &str,
        sentiment: SentimentAssessment,
        emotion: EmotionAssessment,
        source: AnalysisSource,
    ) -> ConversationAnalysis {
        let emotional_intensity = emotion
            .scores
            .iter()
            .map(|(label, score)| score * label.intensity_weight())
            .sum::<f32>()
            .min(1.0);

        let intent_signals = lexicon::CATEGORY_LEXICONS
            .iter()
            .flat_map(|lex| lexicon::matched_phrases(text, lex.keywords))
            .collect();

        ConversationAnalysis {
            sentiment,
            emotion,
            intent_signals,
            persistence_indicators: lexicon::matched_phrases(
                text,
                lexicon::PERSISTENCE_INDICATORS,
            ),
            termination_signals: lexicon::matched_phrases(text, lexicon::TERMINATION_SIGNALS),
            emotional_intensity,
            stage_prediction: Self::predict_stage(text),
            source,
        }
    }

    /// First-match stage prediction over fixed keyword sets.
    fn predict_stage(text: &str) -> SalesStage {
        for (stage, keywords) in lexicon::STAGE_KEYWORDS {
            if lexicon::contains_any(text, keywords) {
                return match *stage {
                    "opening" => SalesStage::Opening,
                    "presentation" => SalesStage::Presentation,
                    "objection_handling" => SalesStage::ObjectionHandling,
                    "closing" => SalesStage::Closing,
                    "termination" => SalesStage::Termination,
                    _ => SalesStage::Unknown,
                };
            }
        }
        SalesStage::Unknown
    }
}

/// Client for the remote text-analytics sentiment endpoint.
pub struct RemoteSentimentClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    language: String,
}

#[derive(Serialize)]
struct SentimentRequest<'a> {
    documents: Vec<SentimentDocument<'a>>,
}

#[derive(Serialize)]
struct SentimentDocument<'a> {
    id: &'a str,
    text: &'a str,
    language: &'a str,
}

#[derive(Deserialize)]
struct SentimentResponse {
    documents: Vec<SentimentResultDocument>,
}

#[derive(Deserialize)]
struct SentimentResultDocument {
    sentiment: String,
    #[serde(rename = "confidenceScores")]
    confidence_scores: ConfidenceScores,
}

#[derive(Deserialize)]
struct ConfidenceScores {
    positive: f32,
    neutral: f32,
    negative: f32,
}

impl RemoteSentimentClient {
    pub fn new(settings: &TextAnalyticsSettings) -> Result<Self, String> {
        if settings.endpoint.is_empty() {
            return Err("text analytics endpoint not configured".to_string());
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            language: settings.language.clone(),
        })
    }

    pub async fn analyze(&self, text: &str) -> Result<SentimentAssessment, String> {
        let request = SentimentRequest {
            documents: vec![SentimentDocument {
                id: "1",
                text,
                language: &self.language,
            }],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("sentiment endpoint returned {}", response.status()));
        }

        let parsed: SentimentResponse = response.json().await.map_err(|e| e.to_string())?;
        let doc = parsed
            .documents
            .into_iter()
            .next()
            .ok_or_else(|| "empty sentiment response".to_string())?;

        let label = SentimentLabel::from_remote(&doc.sentiment);
        let scores = HashMap::from([
            (SentimentLabel::Positive, doc.confidence_scores.positive),
            (SentimentLabel::Neutral, doc.confidence_scores.neutral),
            (SentimentLabel::Negative, doc.confidence_scores.negative),
        ]);
        let confidence = scores.values().fold(0.0f32, |a, b| a.max(*b));

        Ok(SentimentAssessment {
            label,
            confidence,
            scores,
        })
    }
}
