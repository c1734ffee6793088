//! Core types for the call-answering dialogue engine
//!
//! This crate provides the foundational data shapes used across all other
//! crates:
//! - Dialogue state, turns and call stages
//! - Intent and emotion classifications
//! - User and spam-caller profiles
//! - Response strategies and generated responses
//! - Error types
//! - Fingerprint helpers (phone hashing, cache keys)
//!
//! All shapes here are plain records; behavior lives in the components that
//! own them.

pub mod emotion;
pub mod error;
pub mod fingerprint;
pub mod intent;
pub mod profile;
pub mod response;
pub mod stage;
pub mod turn;

pub use emotion::{
    AnalysisSource, ConversationAnalysis, EmotionAssessment, EmotionLabel, SalesStage,
    SentimentAssessment, SentimentLabel,
};
pub use error::{Error, ErrorKind, Result};
pub use fingerprint::{phone_fingerprint, stable_fingerprint, text_hash};
pub use intent::{IntentCategory, IntentResult};
pub use profile::{
    EffectivenessStats, PersonalityType, SpamCategory, SpamProfile, SpeechStyle, UserProfile,
};
pub use response::{AiResponse, ResponseStrategy};
pub use stage::CallStage;
pub use turn::{CallSummary, DialogueState, EmotionalSummary, Speaker, TurnRecord};
