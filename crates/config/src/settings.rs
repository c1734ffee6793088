//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// LLM chat-completion endpoint
    #[serde(default)]
    pub llm: LlmSettings,

    /// Remote text-analytics sentiment endpoint
    #[serde(default)]
    pub text_analytics: TextAnalyticsSettings,

    /// Key-value store (cache + queue backing)
    #[serde(default)]
    pub store: StoreSettings,

    /// Cache TTLs. Single source of truth; callers never hard-code one.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Dialogue engine thresholds
    #[serde(default)]
    pub engine: EngineSettings,

    /// Post-call pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Per-request deadline at the HTTP boundary.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Cap on concurrently served requests.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    15
}

fn default_concurrency_limit() -> usize {
    256
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: false,
            cors_origins: Vec::new(),
            request_timeout_secs: default_request_timeout(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Disable to route every generation through the template bank.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_llm_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_max_tokens() -> usize {
    256
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_llm_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    100
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_llm_endpoint(),
            api_key: String::new(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            timeout_ms: default_llm_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextAnalyticsSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_analytics_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_language() -> String {
    "zh-Hans".to_string()
}

fn default_analytics_timeout_ms() -> u64 {
    2_000
}

impl Default for TextAnalyticsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            api_key: String::new(),
            language: default_language(),
            timeout_ms: default_analytics_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// `redis://` URL. Empty selects the in-memory store (tests, dev).
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_store_pool")]
    pub max_connections: u32,
    /// Salt for caller phone fingerprints.
    #[serde(default = "default_fingerprint_salt")]
    pub fingerprint_salt: String,
}

fn default_store_url() -> String {
    std::env::var("CALLGUARD_STORE_URL").unwrap_or_default()
}

fn default_store_pool() -> u32 {
    16
}

fn default_fingerprint_salt() -> String {
    "callguard-dev-salt".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            max_connections: default_store_pool(),
            fingerprint_salt: default_fingerprint_salt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Response cache TTL. The single source of truth for this value.
    #[serde(default = "default_response_ttl")]
    pub response_ttl_secs: u64,
    #[serde(default = "default_intent_ttl")]
    pub intent_ttl_secs: u64,
    #[serde(default = "default_sentiment_ttl")]
    pub sentiment_ttl_secs: u64,
    #[serde(default = "default_state_ttl")]
    pub dialogue_state_ttl_secs: u64,
    #[serde(default = "default_analysis_ttl")]
    pub analysis_ttl_secs: u64,
    #[serde(default = "default_batch_ttl")]
    pub batch_ttl_secs: u64,
}

fn default_response_ttl() -> u64 {
    3_600
}

fn default_intent_ttl() -> u64 {
    3_600
}

fn default_sentiment_ttl() -> u64 {
    1_800
}

fn default_state_ttl() -> u64 {
    7_200
}

fn default_analysis_ttl() -> u64 {
    3_600
}

fn default_batch_ttl() -> u64 {
    86_400
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            response_ttl_secs: default_response_ttl(),
            intent_ttl_secs: default_intent_ttl(),
            sentiment_ttl_secs: default_sentiment_ttl(),
            dialogue_state_ttl_secs: default_state_ttl(),
            analysis_ttl_secs: default_analysis_ttl(),
            batch_ttl_secs: default_batch_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
    #[serde(default = "default_persistence_threshold")]
    pub persistence_threshold: f32,
    #[serde(default = "default_frustration_threshold")]
    pub frustration_threshold: f32,
    #[serde(default = "default_min_effectiveness")]
    pub min_effectiveness: f32,
    /// Minimum confidence for a generated response to be cached.
    #[serde(default = "default_cache_confidence")]
    pub response_cache_confidence: f32,
    /// Soft per-turn latency budget. Exceeding it logs a warning, never
    /// blocks the reply.
    #[serde(default = "default_turn_budget_ms")]
    pub turn_budget_ms: u64,
    /// Minimum spacing between two threshold adaptations.
    #[serde(default = "default_adaptation_window")]
    pub adaptation_window_secs: u64,
}

fn default_max_turns() -> usize {
    8
}

fn default_max_duration() -> u64 {
    180
}

fn default_persistence_threshold() -> f32 {
    0.8
}

fn default_frustration_threshold() -> f32 {
    0.9
}

fn default_min_effectiveness() -> f32 {
    0.3
}

fn default_cache_confidence() -> f32 {
    0.6
}

fn default_turn_budget_ms() -> u64 {
    300
}

fn default_adaptation_window() -> u64 {
    300
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_duration_secs: default_max_duration(),
            persistence_threshold: default_persistence_threshold(),
            frustration_threshold: default_frustration_threshold(),
            min_effectiveness: default_min_effectiveness(),
            response_cache_confidence: default_cache_confidence(),
            turn_budget_ms: default_turn_budget_ms(),
            adaptation_window_secs: default_adaptation_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Worker pool size for post-call analyses.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_analyses: usize,
    /// Per-priority queue length bound; enqueue beyond it fails QueueFull.
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,
    #[serde(default = "default_pop_timeout_secs")]
    pub pop_timeout_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_task_retries")]
    pub high_priority_retries: u32,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_queue_bound() -> usize {
    1_000
}

fn default_pop_timeout_secs() -> u64 {
    1
}

fn default_grace_secs() -> u64 {
    10
}

fn default_task_retries() -> u32 {
    3
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_analyses: default_max_concurrent(),
            queue_bound: default_queue_bound(),
            pop_timeout_secs: default_pop_timeout_secs(),
            shutdown_grace_secs: default_grace_secs(),
            high_priority_retries: default_task_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings. Run once at startup; any failure is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }

        if self.server.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "server.concurrency_limit must be > 0".into(),
            ));
        }

        if self.engine.max_turns == 0 {
            return Err(ConfigError::Invalid("engine.max_turns must be > 0".into()));
        }

        for (name, value) in [
            (
                "engine.persistence_threshold",
                self.engine.persistence_threshold,
            ),
            (
                "engine.frustration_threshold",
                self.engine.frustration_threshold,
            ),
            ("engine.min_effectiveness", self.engine.min_effectiveness),
            (
                "engine.response_cache_confidence",
                self.engine.response_cache_confidence,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        if self.pipeline.max_concurrent_analyses == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_concurrent_analyses must be > 0".into(),
            ));
        }

        if self.pipeline.queue_bound == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.queue_bound must be > 0".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid(format!(
                "llm.temperature must be within [0, 2], got {}",
                self.llm.temperature
            )));
        }

        if self.text_analytics.enabled && self.text_analytics.endpoint.is_empty() {
            return Err(ConfigError::Invalid(
                "text_analytics.endpoint required when text_analytics.enabled".into(),
            ));
        }

        if self.environment.is_strict() && self.store.fingerprint_salt == default_fingerprint_salt()
        {
            return Err(ConfigError::Invalid(
                "store.fingerprint_salt must be overridden outside development".into(),
            ));
        }

        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if Path::new("config/default.yaml").exists() {
        builder = builder.add_source(File::with_name("config/default"));
    }

    if let Some(env_name) = env {
        let env_path = format!("config/{}", env_name);
        if Path::new(&format!("{}.yaml", env_path)).exists() {
            builder = builder.add_source(File::with_name(&env_path));
        }
    }

    let config = builder
        .add_source(Environment::with_prefix("CALLGUARD").separator("__"))
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut settings = Settings::default();
        settings.engine.persistence_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_production_requires_real_salt() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate().is_err());

        settings.store.fingerprint_salt = "deployment-specific".into();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_section_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.engine.max_turns, 8);
        assert_eq!(settings.engine.max_duration_secs, 180);
        assert_eq!(settings.cache.response_ttl_secs, 3_600);
        assert_eq!(settings.cache.batch_ttl_secs, 86_400);
    }
}
