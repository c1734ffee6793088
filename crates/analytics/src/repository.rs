//! Storage adapter for call records and analysis results
//!
//! The pipeline is storage-agnostic: it reads completed calls and writes
//! analysis rows through this trait. The in-memory implementation backs
//! tests and store-less development.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use callguard_core::{DialogueState, ResponseStrategy, UserProfile};

use crate::AnalyticsError;

/// A completed call as the pipeline sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub state: DialogueState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
    /// Outcome tag: `successful_termination`, `caller_hung_up`, `failed`, …
    #[serde(default)]
    pub outcome: String,
    pub ended_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn new(state: DialogueState, termination_reason: Option<String>, outcome: &str) -> Self {
        Self {
            state,
            termination_reason,
            outcome: outcome.to_string(),
            ended_at: Utc::now(),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.state.call_id
    }

    /// Strategies used over the call, in turn order.
    pub fn strategies_used(&self) -> Vec<ResponseStrategy> {
        self.state
            .turns
            .iter()
            .filter_map(|t| t.strategy)
            .collect()
    }

    /// Full transcript with speaker labels.
    pub fn transcript(&self) -> String {
        self.state
            .turns
            .iter()
            .map(|t| {
                let label = match t.speaker {
                    callguard_core::Speaker::Caller => "来电者",
                    callguard_core::Speaker::Ai => "AI助手",
                };
                format!("{}: {}", label, t.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Stored analysis row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRow {
    pub call_id: String,
    pub analysis_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Read/write contract against durable storage.
#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn call_record(&self, call_id: &str) -> Result<Option<CallRecord>, AnalyticsError>;

    async fn recent_calls(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<CallRecord>, AnalyticsError>;

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, AnalyticsError>;

    async fn save_call_record(&self, record: CallRecord) -> Result<(), AnalyticsError>;

    async fn save_analysis(
        &self,
        call_id: &str,
        analysis_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), AnalyticsError>;
}

/// In-memory repository.
#[derive(Default)]
pub struct InMemoryRepository {
    calls: DashMap<String, CallRecord>,
    profiles: DashMap<String, UserProfile>,
    analyses: Mutex<Vec<AnalysisRow>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_profile(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    /// Stored analysis rows (test inspection).
    pub fn analyses(&self) -> Vec<AnalysisRow> {
        self.analyses.lock().clone()
    }
}

#[async_trait]
impl AnalyticsRepository for InMemoryRepository {
    async fn call_record(&self, call_id: &str) -> Result<Option<CallRecord>, AnalyticsError> {
        Ok(self.calls.get(call_id).map(|r| r.clone()))
    }

    async fn recent_calls(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<CallRecord>, AnalyticsError> {
        let mut records: Vec<CallRecord> = self
            .calls
            .iter()
            .filter(|r| r.state.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, AnalyticsError> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }

    async fn save_call_record(&self, record: CallRecord) -> Result<(), AnalyticsError> {
        self.calls.insert(record.call_id().to_string(), record);
        Ok(())
    }

    async fn save_analysis(
        &self,
        call_id: &str,
        analysis_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), AnalyticsError> {
        self.analyses.lock().push(AnalysisRow {
            call_id: call_id.to_string(),
            analysis_type: analysis_type.to_string(),
            payload,
            created_at: Utc::now(),
        });
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use callguard_core::CallStage;

    #[tokio::test]
    async fn test_round_trip() {
        let repo = InMemoryRepository::new();
        let record = fixtures::loan_call("c-1", 3, CallStage::CallEnd);
        repo.save_call_record(record).await.unwrap();

        let loaded = repo.call_record("c-1").await.unwrap().unwrap();
        assert_eq!(loaded.call_id(), "c-1");
        assert_eq!(loaded.state.caller_turns(), 3);
        assert!(!loaded.strategies_used().is_empty());
        assert!(loaded.transcript().contains("来电者"));
    }

    #[tokio::test]
    async fn test_recent_calls_scoped_by_user() {
        let repo = InMemoryRepository::new();
        repo.save_call_record(fixtures::loan_call("c-1", 2, CallStage::CallEnd))
            .await
            .unwrap();
        repo.save_call_record(fixtures::loan_call("c-2", 2, CallStage::CallEnd))
            .await
            .unwrap();

        let records = repo.recent_calls("user-1", 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(repo.recent_calls("someone-else", 10).await.unwrap().is_empty());
    }
}
