//! Natural-language call summaries
//!
//! Builds a prompt from call metadata, the formatted conversation and the
//! sub-analysis results, and asks the LLM for a summary in the requested
//! style. On any failure a deterministic template summary is produced from
//! the same inputs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use callguard_llm::{ChatBackend, GenerationOptions, Message};

use crate::repository::CallRecord;

/// Summary style, selecting prompt template and token cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStyle {
    Brief,
    #[default]
    Comprehensive,
    Detailed,
}

impl SummaryStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStyle::Brief => "brief",
            SummaryStyle::Comprehensive => "comprehensive",
            SummaryStyle::Detailed => "detailed",
        }
    }

    fn max_tokens(&self) -> usize {
        match self {
            SummaryStyle::Detailed => 1000,
            _ => 500,
        }
    }
}

/// Generated summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    pub call_id: String,
    pub style: SummaryStyle,
    pub text: String,
    /// False when the template fallback produced the text.
    pub generated: bool,
}

/// Summary generator.
pub struct SummaryGenerator {
    backend: Option<Arc<dyn ChatBackend>>,
}

impl SummaryGenerator {
    pub fn new(backend: Option<Arc<dyn ChatBackend>>) -> Self {
        Self { backend }
    }

    pub async fn generate(
        &self,
        record: &CallRecord,
        analyses: &serde_json::Value,
        style: SummaryStyle,
    ) -> SummaryReport {
        if let Some(backend) = &self.backend {
            let messages = Self::build_prompt(record, analyses, style);
            let options = GenerationOptions {
                max_tokens: Some(style.max_tokens()),
                temperature: Some(0.3),
                ..Default::default()
            };

            match backend.generate(&messages, &options).await {
                Ok(result) if !result.text.trim().is_empty() => {
                    return SummaryReport {
                        call_id: record.call_id().to_string(),
                        style,
                        text: result.text,
                        generated: true,
                    };
                }
                Ok(_) => {
                    tracing::warn!(call_id = %record.call_id(), "empty summary completion");
                }
                Err(e) => {
                    tracing::warn!(call_id = %record.call_id(), error = %e, "summary generation failed");
                }
            }
        }

        SummaryReport {
            call_id: record.call_id().to_string(),
            style,
            text: Self::template_summary(record, style),
            generated: false,
        }
    }

    fn build_prompt(
        record: &CallRecord,
        analyses: &serde_json::Value,
        style: SummaryStyle,
    ) -> Vec<Message> {
        let style_instruction = match style {
            SummaryStyle::Brief => "用两三句话概括这通电话的类型和处理结果。",
            SummaryStyle::Comprehensive => {
                "总结这通骚扰电话：来电类型、来电者行为、AI的应对策略、最终结果，以及对用户的建议。"
            }
            SummaryStyle::Detailed => {
                "详细分析这通骚扰电话：逐阶段描述对话走向、来电者的情绪变化、各项分析指标，并给出后续防护建议。"
            }
        };

        let state = &record.state;
        let system = format!(
            "你是通话分析助手，请根据以下信息生成中文总结。\n\
             通话编号：{call_id}\n\
             对话轮次：{turns}\n\
             最终阶段：{stage}\n\
             结束原因：{reason}\n\
             关键信息：{key_points}\n\
             分析结果：{analyses}\n\
             {instruction}",
            call_id = state.call_id,
            turns = state.caller_turns(),
            stage = state.stage,
            reason = record.termination_reason.as_deref().unwrap_or("unknown"),
            key_points = state.key_points.join("；"),
            analyses = analyses,
            instruction = style_instruction,
        );

        vec![
            Message::system(system),
            Message::user(record.transcript()),
        ]
    }

    /// Deterministic fallback summary built from the same inputs.
    fn template_summary(record: &CallRecord, style: SummaryStyle) -> String {
        let state = &record.state;
        let dominant_intent = state
            .intent_distribution()
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(intent, _)| intent.as_str())
            .unwrap_or("unknown");

        let base = format!(
            "骚扰电话（类型：{}）共{}轮对话，最终阶段为{}，结束原因：{}。",
            dominant_intent,
            state.caller_turns(),
            state.stage,
            record.termination_reason.as_deref().unwrap_or("未知"),
        );

        match style {
            SummaryStyle::Brief => base,
            _ => {
                let key_points = if state.key_points.is_empty() {
                    "无".to_string()
                } else {
                    state.key_points.join("；")
                };
                format!("{}关键信息：{}。", base, key_points)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;
    use callguard_core::CallStage;

    #[tokio::test]
    async fn test_template_fallback_without_backend() {
        let generator = SummaryGenerator::new(None);
        let record = fixtures::loan_call("c-1", 3, CallStage::CallEnd);

        let report = generator
            .generate(&record, &serde_json::json!({}), SummaryStyle::Comprehensive)
            .await;

        assert!(!report.generated);
        assert!(report.text.contains("loan_offer"));
        assert!(report.text.contains("3"));
    }

    #[tokio::test]
    async fn test_brief_is_shorter() {
        let generator = SummaryGenerator::new(None);
        let mut record = fixtures::loan_call("c-1", 3, CallStage::CallEnd);
        record.state.key_points = vec!["额度最高五十万".to_string()];

        let brief = generator
            .generate(&record, &serde_json::json!({}), SummaryStyle::Brief)
            .await;
        let detailed = generator
            .generate(&record, &serde_json::json!({}), SummaryStyle::Detailed)
            .await;

        assert!(brief.text.chars().count() < detailed.text.chars().count());
        assert!(detailed.text.contains("额度最高五十万"));
    }

    #[test]
    fn test_prompt_carries_transcript() {
        let record = fixtures::loan_call("c-1", 2, CallStage::CallEnd);
        let messages =
            SummaryGenerator::build_prompt(&record, &serde_json::json!({}), SummaryStyle::Brief);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("来电者"));
    }
}
