//! Typed configuration for the call-answering engine
//!
//! One `Settings` value is loaded and validated at startup; downstream
//! components receive only the section they need. There are no untyped
//! configuration blobs anywhere else in the workspace.

mod settings;

pub use settings::{
    CacheSettings, EngineSettings, LlmSettings, ObservabilitySettings, PipelineSettings,
    RuntimeEnvironment, ServerSettings, Settings, StoreSettings, TextAnalyticsSettings,
    load_settings,
};

use thiserror::Error;

/// Configuration errors. Any of these at startup is fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}
