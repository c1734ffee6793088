//! Dialogue core
//!
//! Per-call conversation handling for inbound nuisance calls:
//! - [`tracker`]: dialogue state and the stage state machine
//! - [`intent`]: multi-layer intent classification
//! - [`sentiment`]: sentiment/emotion analysis with backend fallback chain
//! - [`responder`]: strategy-driven personalized response generation
//! - [`termination`]: call termination decisions
//! - [`manager`]: the per-turn orchestrator, the only component exported to
//!   external callers
//!
//! Components take their collaborators by injection; nothing reaches into a
//! process global.

pub mod intent;
pub mod lexicon;
pub mod manager;
pub mod responder;
pub mod sentiment;
pub mod strategy;
pub mod termination;
pub mod tracker;

pub use intent::IntentClassifier;
pub use manager::{ConversationManager, TurnOutcome, TurnRequest};
pub use responder::ResponseGenerator;
pub use sentiment::SentimentAnalyzer;
pub use strategy::select_strategy;
pub use termination::{TerminationDecider, TerminationDecision, TerminationMetrics};
pub use tracker::DialogueStateTracker;

use thiserror::Error;

/// Engine errors. The orchestrator converts every internal failure into a
/// fallback; only input and lifecycle errors cross the boundary.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("dialogue state closed: {0}")]
    StateClosed(String),

    #[error("unknown call: {0}")]
    UnknownCall(String),
}

impl From<EngineError> for callguard_core::Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidInput(msg) => callguard_core::Error::InputInvalid(msg),
            EngineError::StateClosed(msg) => callguard_core::Error::StateClosed(msg),
            EngineError::UnknownCall(msg) => callguard_core::Error::InputInvalid(msg),
        }
    }
}
