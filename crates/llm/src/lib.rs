//! LLM integration
//!
//! Chat-completion client used by the response generator and the summary
//! generator. One backend: any OpenAI-compatible chat-completions endpoint,
//! with retry and bounded timeouts. Failures here are always recoverable by
//! the caller's template fallback.

pub mod chat;
pub mod prompt;

pub use chat::{
    ChatBackend, ChatClient, ChatConfig, FinishReason, GenerationOptions, GenerationResult,
};
pub use prompt::{estimate_tokens, Message, Role};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("generation disabled")]
    Disabled,

    #[error("api error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for callguard_core::Error {
    fn from(err: LlmError) -> Self {
        callguard_core::Error::Transient(err.to_string())
    }
}
