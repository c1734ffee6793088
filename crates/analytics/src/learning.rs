//! Learning system
//!
//! Consumes completed calls one at a time and in batches: maintains
//! per-strategy running statistics, extracts recurring conversation
//! patterns, and turns both into insights. High-confidence insights are
//! applied — they feed the termination decider's threshold adaptation and
//! future strategy tuning.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use callguard_core::{EmotionLabel, IntentCategory};

use crate::repository::CallRecord;
use crate::AnalyticsError;

/// Patterns need at least this many occurrences to be retained.
const PATTERN_MIN_FREQUENCY: u32 = 3;

/// Insights at or above this confidence are applied.
const APPLY_CONFIDENCE: f32 = 0.7;

/// Running statistics for one response strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StrategyStats {
    pub usage_count: u64,
    pub success_count: u64,
    pub total_effectiveness: f64,
    pub total_turns: u64,
}

impl StrategyStats {
    pub fn success_rate(&self) -> f32 {
        if self.usage_count == 0 {
            return 0.0;
        }
        self.success_count as f32 / self.usage_count as f32
    }

    pub fn avg_effectiveness(&self) -> f32 {
        if self.usage_count == 0 {
            return 0.0;
        }
        (self.total_effectiveness / self.usage_count as f64) as f32
    }
}

/// Kind of recurring conversation pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Successful,
    Failed,
    Escalation,
    DeEscalation,
    Neutral,
}

/// A recurring conversation shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPattern {
    pub kind: PatternKind,
    pub intent_sequence: Vec<IntentCategory>,
    pub turn_count: usize,
    pub effectiveness: f32,
    pub frequency: u32,
}

/// Finding that may alter future strategy or threshold choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInsight {
    pub insight_type: String,
    pub description: String,
    pub confidence: f32,
    pub recommended_action: String,
    pub expected_improvement: f32,
    pub applied: bool,
}

/// Batch learning output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLearningReport {
    pub calls_analyzed: usize,
    pub patterns_identified: usize,
    pub insights: Vec<LearningInsight>,
    pub strategy_performance: BTreeMap<String, StrategyStats>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
struct LearningCounters {
    conversations_analyzed: u64,
    insights_generated: u64,
    improvements_applied: u64,
}

/// Exported learning model. Round-trips byte-equal: all maps are ordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningModel {
    strategy_stats: BTreeMap<String, StrategyStats>,
    counters: LearningCounters,
}

/// The learning system.
#[derive(Default)]
pub struct LearningSystem {
    strategy_stats: Mutex<BTreeMap<String, StrategyStats>>,
    patterns: Mutex<Vec<ConversationPattern>>,
    counters: Mutex<LearningCounters>,
}

impl LearningSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one completed call into the per-strategy running averages.
    pub fn learn_from_call(&self, record: &CallRecord, effectiveness: f32) {
        let successful = Self::is_successful(record);
        let turns = record.state.caller_turns() as u64;

        {
            let mut stats = self.strategy_stats.lock();
            for strategy in record.strategies_used() {
                let entry = stats.entry(strategy.as_str().to_string()).or_default();
                entry.usage_count += 1;
                entry.total_effectiveness += effectiveness as f64;
                entry.total_turns += turns;
                if successful {
                    entry.success_count += 1;
                }
            }
        }

        self.counters.lock().conversations_analyzed += 1;
        tracing::debug!(
            call_id = %record.call_id(),
            effectiveness,
            successful,
            "learned from call"
        );
    }

    /// Batch learning: pattern extraction, per-strategy aggregates, insight
    /// generation and application.
    pub fn batch_learn(&self, records: &[CallRecord]) -> BatchLearningReport {
        for record in records {
            let effectiveness = Self::proxy_effectiveness(record);
            self.learn_from_call(record, effectiveness);
        }

        let patterns = self.extract_patterns(records);
        let retained: Vec<&ConversationPattern> = patterns
            .iter()
            .filter(|p| p.frequency >= PATTERN_MIN_FREQUENCY)
            .collect();

        let mut insights = self.generate_insights(&retained);
        let applied = insights.iter_mut().filter(|i| i.confidence >= APPLY_CONFIDENCE);
        let mut applied_count = 0u64;
        for insight in applied {
            insight.applied = true;
            applied_count += 1;
            tracing::info!(
                insight_type = %insight.insight_type,
                action = %insight.recommended_action,
                confidence = insight.confidence,
                "applying learning insight"
            );
        }

        {
            let mut counters = self.counters.lock();
            counters.insights_generated += insights.len() as u64;
            counters.improvements_applied += applied_count;
        }

        {
            let mut stored = self.patterns.lock();
            stored.extend(patterns.iter().filter(|p| p.frequency >= PATTERN_MIN_FREQUENCY).cloned());
        }

        BatchLearningReport {
            calls_analyzed: records.len(),
            patterns_identified: retained.len(),
            insights,
            strategy_performance: self.strategy_stats.lock().clone(),
        }
    }

    /// Compact effectiveness proxy when no evaluator report is available.
    pub fn proxy_effectiveness(record: &CallRecord) -> f32 {
        let turns = record.state.caller_turns();
        let turn_score = (1.0 - turns as f32 / 10.0).max(0.0);

        let outcome_score = if Self::is_successful(record) {
            0.4
        } else if record.outcome == "caller_hung_up" {
            0.2
        } else {
            0.0
        };

        let emotional_control = if Self::is_escalation(&record.state.emotion_trajectory) {
            0.0
        } else {
            0.2
        };

        (0.4 * turn_score + outcome_score + emotional_control).min(1.0)
    }

    fn is_successful(record: &CallRecord) -> bool {
        matches!(
            record.outcome.as_str(),
            "successful_termination" | "caller_accepted"
        )
    }

    fn extract_patterns(&self, records: &[CallRecord]) -> Vec<ConversationPattern> {
        let mut patterns: Vec<ConversationPattern> = Vec::new();

        for record in records {
            let kind = Self::pattern_kind(record);
            let intent_sequence = record.state.intent_history.clone();
            let turn_count = record.state.caller_turns();
            let effectiveness = Self::proxy_effectiveness(record);

            match patterns.iter_mut().find(|p| {
                p.kind == kind
                    && p.intent_sequence == intent_sequence
                    && p.turn_count.abs_diff(turn_count) <= 2
            }) {
                Some(existing) => existing.frequency += 1,
                None => patterns.push(ConversationPattern {
                    kind,
                    intent_sequence,
                    turn_count,
                    effectiveness,
                    frequency: 1,
                }),
            }
        }

        patterns
    }

    fn pattern_kind(record: &CallRecord) -> PatternKind {
        let turns = record.state.caller_turns();
        if Self::is_successful(record) && turns <= 5 {
            PatternKind::Successful
        } else if record.outcome == "failed" || turns > 10 {
            PatternKind::Failed
        } else if Self::is_escalation(&record.state.emotion_trajectory) {
            PatternKind::Escalation
        } else if Self::is_de_escalation(&record.state.emotion_trajectory) {
            PatternKind::DeEscalation
        } else {
            PatternKind::Neutral
        }
    }

    fn is_escalation(trajectory: &[EmotionLabel]) -> bool {
        if trajectory.len() < 3 {
            return false;
        }
        let first = trajectory.first().map(|e| e.escalation_rank()).unwrap_or(2);
        let last = trajectory.last().map(|e| e.escalation_rank()).unwrap_or(2);
        last > first && last >= 5
    }

    fn is_de_escalation(trajectory: &[EmotionLabel]) -> bool {
        if trajectory.len() < 3 {
            return false;
        }
        let first = trajectory.first().map(|e| e.escalation_rank()).unwrap_or(2);
        let last = trajectory.last().map(|e| e.escalation_rank()).unwrap_or(2);
        last < first && last <= 3
    }

    fn generate_insights(&self, patterns: &[&ConversationPattern]) -> Vec<LearningInsight> {
        let mut insights = Vec::new();

        // Underperforming strategies.
        for (strategy, stats) in self.strategy_stats.lock().iter() {
            if stats.usage_count >= 3 && stats.avg_effectiveness() < 0.4 {
                insights.push(LearningInsight {
                    insight_type: "strategy_underperformance".to_string(),
                    description: format!(
                        "strategy '{}' averages {:.2} effectiveness over {} calls",
                        strategy,
                        stats.avg_effectiveness(),
                        stats.usage_count
                    ),
                    confidence: 0.8,
                    recommended_action: format!("replace or modify {}", strategy),
                    expected_improvement: 0.2,
                    applied: false,
                });
            }

            if stats.usage_count > 10 && stats.success_rate() > 0.8 {
                insights.push(LearningInsight {
                    insight_type: "high_performing_strategy".to_string(),
                    description: format!(
                        "strategy '{}' succeeds {:.0}% of the time",
                        strategy,
                        stats.success_rate() * 100.0
                    ),
                    confidence: 0.95,
                    recommended_action: format!("prefer {} in matching contexts", strategy),
                    expected_improvement: 0.1,
                    applied: false,
                });
            }
        }

        // The strongest successful pattern.
        if let Some(best) = patterns
            .iter()
            .filter(|p| p.kind == PatternKind::Successful)
            .max_by(|a, b| {
                a.effectiveness
                    .partial_cmp(&b.effectiveness)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        {
            insights.push(LearningInsight {
                insight_type: "effective_pattern".to_string(),
                description: format!(
                    "{}-turn pattern reaches {:.2} effectiveness ({} occurrences)",
                    best.turn_count, best.effectiveness, best.frequency
                ),
                confidence: 0.9,
                recommended_action: "replicate this pattern in similar contexts".to_string(),
                expected_improvement: (best.effectiveness - 0.5).max(0.0),
                applied: false,
            });
        }

        // Escalation risk.
        let escalations = patterns
            .iter()
            .filter(|p| p.kind == PatternKind::Escalation)
            .count();
        if escalations > 2 {
            insights.push(LearningInsight {
                insight_type: "escalation_risk".to_string(),
                description: format!("{} recurring escalation patterns", escalations),
                confidence: 0.85,
                recommended_action: "apply de-escalation strategies earlier".to_string(),
                expected_improvement: 0.25,
                applied: false,
            });
        }

        insights
    }

    /// Observed success rate across all strategies, feeding termination
    /// threshold adaptation.
    pub fn overall_success_rate(&self) -> f32 {
        let stats = self.strategy_stats.lock();
        let (successes, usages) = stats
            .values()
            .fold((0u64, 0u64), |(s, u), stat| {
                (s + stat.success_count, u + stat.usage_count)
            });
        if usages == 0 {
            return 1.0;
        }
        successes as f32 / usages as f32
    }

    pub fn strategy_performance(&self) -> BTreeMap<String, StrategyStats> {
        self.strategy_stats.lock().clone()
    }

    pub fn metrics(&self) -> serde_json::Value {
        let counters = self.counters.lock().clone();
        serde_json::json!({
            "conversations_analyzed": counters.conversations_analyzed,
            "insights_generated": counters.insights_generated,
            "improvements_applied": counters.improvements_applied,
            "tracked_strategies": self.strategy_stats.lock().len(),
            "retained_patterns": self.patterns.lock().len(),
            "overall_success_rate": self.overall_success_rate(),
        })
    }

    /// Export the learned model. Deterministic: identical internal state
    /// serializes to identical bytes.
    pub fn export_model(&self) -> Result<Vec<u8>, AnalyticsError> {
        let model = LearningModel {
            strategy_stats: self.strategy_stats.lock().clone(),
            counters: self.counters.lock().clone(),
        };
        Ok(serde_json::to_vec(&model)?)
    }

    /// Import a previously exported model, replacing internal counters.
    pub fn import_model(&self, raw: &[u8]) -> Result<(), AnalyticsError> {
        let model: LearningModel = serde_json::from_slice(raw)?;
        *self.strategy_stats.lock() = model.strategy_stats;
        *self.counters.lock() = model.counters;
        tracing::info!("learning model imported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use callguard_core::CallStage;

    #[test]
    fn test_strategy_stats_accumulate() {
        let learning = LearningSystem::new();
        let record = fixtures::loan_call("c-1", 3, CallStage::CallEnd);
        learning.learn_from_call(&record, 0.8);
        learning.learn_from_call(&record, 0.6);

        let stats = learning.strategy_performance();
        let entry = stats.get("explain_not_interested").unwrap();
        // Three strategy-tagged turns per call, two calls.
        assert_eq!(entry.usage_count, 6);
        assert!(entry.success_rate() > 0.99);
        assert!((entry.avg_effectiveness() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_pattern_min_frequency() {
        let learning = LearningSystem::new();

        // Two similar calls: below the retention threshold.
        let records: Vec<CallRecord> = (0..2)
            .map(|i| fixtures::loan_call(&format!("c-{}", i), 3, CallStage::CallEnd))
            .collect();
        let report = learning.batch_learn(&records);
        assert_eq!(report.patterns_identified, 0);

        // Three more of the same shape cross it.
        let records: Vec<CallRecord> = (0..3)
            .map(|i| fixtures::loan_call(&format!("d-{}", i), 3, CallStage::CallEnd))
            .collect();
        let report = learning.batch_learn(&records);
        assert_eq!(report.patterns_identified, 1);
    }

    #[test]
    fn test_insights_applied_at_confidence() {
        let learning = LearningSystem::new();
        let records: Vec<CallRecord> = (0..3)
            .map(|i| {
                let mut record =
                    fixtures::loan_call(&format!("c-{}", i), 9, CallStage::Initial);
                record.outcome = "failed".to_string();
                record
            })
            .collect();

        let report = learning.batch_learn(&records);
        let underperforming: Vec<_> = report
            .insights
            .iter()
            .filter(|i| i.insight_type == "strategy_underperformance")
            .collect();
        assert!(!underperforming.is_empty());
        assert!(underperforming.iter().all(|i| i.applied));
    }

    #[test]
    fn test_export_import_byte_equal() {
        let learning = LearningSystem::new();
        let record = fixtures::loan_call("c-1", 4, CallStage::CallEnd);
        learning.learn_from_call(&record, 0.75);

        let exported = learning.export_model().unwrap();

        let restored = LearningSystem::new();
        restored.import_model(&exported).unwrap();
        let re_exported = restored.export_model().unwrap();

        assert_eq!(exported, re_exported);
    }

    #[test]
    fn test_escalation_detection() {
        assert!(LearningSystem::is_escalation(&[
            EmotionLabel::Neutral,
            EmotionLabel::Annoyed,
            EmotionLabel::Aggressive,
        ]));
        assert!(!LearningSystem::is_escalation(&[
            EmotionLabel::Aggressive,
            EmotionLabel::Neutral,
            EmotionLabel::Friendly,
        ]));
        assert!(LearningSystem::is_de_escalation(&[
            EmotionLabel::Aggressive,
            EmotionLabel::Neutral,
            EmotionLabel::Friendly,
        ]));
    }
}
