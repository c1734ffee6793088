//! Persisted key layout
//!
//! Every key format the engine writes lives here so no component builds
//! keys by ad-hoc string concatenation.

/// Channel carrying completed analysis results.
pub const ANALYSIS_RESULTS_CHANNEL: &str = "analysis_results";

/// Dialogue-state snapshot for a live call (2 h TTL).
pub fn dialogue_state(call_id: &str) -> String {
    format!("dialogue_state:{}", call_id)
}

/// Cached intent classification for an utterance hash (1 h TTL).
pub fn intent(text_hash: &str) -> String {
    format!("intent:{}", text_hash)
}

/// Cached sentiment analysis for an utterance hash.
pub fn sentiment(text_hash: &str) -> String {
    format!("sentiment:{}", text_hash)
}

/// Cached generated response for a context fingerprint.
pub fn response(fingerprint: &str) -> String {
    format!("response:{}", fingerprint)
}

/// Cached post-call analysis of one kind.
pub fn analysis(call_id: &str, kind: &str) -> String {
    format!("analysis:{}:{}", call_id, kind)
}

/// Dedup guard for at-most-once analysis execution.
pub fn analysis_dedup(call_id: &str, kind: &str) -> String {
    format!("analysis_dedup:{}:{}", call_id, kind)
}

/// Priority task queue.
pub fn task_queue(priority: &str) -> String {
    format!("analysis_tasks:{}", priority)
}

/// Batch job record (24 h TTL).
pub fn batch(batch_id: &str) -> String {
    format!("batch:{}", batch_id)
}

/// Spam profile for a caller fingerprint.
pub fn spam_profile(fingerprint: &str) -> String {
    format!("spam_profile:{}", fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(dialogue_state("c1"), "dialogue_state:c1");
        assert_eq!(intent("abcd"), "intent:abcd");
        assert_eq!(response("fp"), "response:fp");
        assert_eq!(task_queue("high"), "analysis_tasks:high");
        assert_eq!(batch("b1"), "batch:b1");
        assert_eq!(analysis("c1", "summary"), "analysis:c1:summary");
    }
}
