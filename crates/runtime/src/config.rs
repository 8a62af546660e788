//! Configuration for the Chronicler runtime
//!
//! Centralized configuration with TOML file loading, environment overrides
//! and explicit validation. Secrets (`api_key` fields) are never serialized
//! back out. Policy configuration is additionally hot-reloadable through
//! [`PolicyConfigManager`], which swaps validated immutable snapshots and
//! retains the previous snapshot for rollback.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("io error reading config file: {0}")]
    Io(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub journey_log: JourneyLogConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Journey-log client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JourneyLogConfig {
    /// Base URL of the journey-log service. A trailing slash is stripped at
    /// client construction.
    pub base_url: String,
    pub timeout_seconds: u64,
    /// How many prior turns to request in the context call.
    pub recent_n: usize,
    pub max_retries: u32,
    pub retry_delay_base_ms: u64,
    pub retry_delay_max_ms: u64,
}

impl Default for JourneyLogConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8800".to_string(),
            timeout_seconds: 10,
            recent_n: 10,
            max_retries: 3,
            retry_delay_base_ms: 250,
            retry_delay_max_ms: 4_000,
        }
    }
}

/// Which wire protocol the narrative model endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// OpenAI-compatible chat completions (also OpenRouter and most local
    /// inference servers).
    #[default]
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::OpenAi => write!(f, "openai"),
            LlmProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Narrative model client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    /// Provider API key. Required unless `stub_mode` is on.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_base_ms: u64,
    pub retry_delay_max_ms: u64,
    /// Return a canned outcome instead of calling the provider. Used by
    /// tests and offline runs.
    pub stub_mode: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            timeout_seconds: 60,
            max_retries: 3,
            retry_delay_base_ms: 500,
            retry_delay_max_ms: 8_000,
            stub_mode: false,
        }
    }
}

/// Strategy for choosing the spark injected into the quest hint region when
/// several candidates are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SparkSelection {
    /// Uniform choice among candidates.
    #[default]
    Random,
    /// Weighted toward more recently created points of interest.
    RecencyWeighted,
}

/// Policy engine configuration. Hot-reloadable via [`PolicyConfigManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub quest_trigger_probability: f64,
    pub quest_cooldown_turns: u32,
    pub poi_trigger_probability: f64,
    pub poi_cooldown_turns: u32,
    pub memory_spark_probability: f64,
    /// Random POIs requested per spark fetch (1–20).
    pub memory_spark_count: usize,
    pub memory_sparks_enabled: bool,
    pub quest_poi_reference_probability: f64,
    /// Seed for reproducible policy rolls. Unset means OS entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng_seed: Option<u64>,
    /// Suppress quest/combat/POI writes for a Dead character in the
    /// orchestrator instead of relying on the model to emit empty intents.
    pub enforce_dead_character: bool,
    pub spark_selection: SparkSelection,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            quest_trigger_probability: 0.15,
            quest_cooldown_turns: 5,
            poi_trigger_probability: 0.2,
            poi_cooldown_turns: 3,
            memory_spark_probability: 0.3,
            memory_spark_count: 3,
            memory_sparks_enabled: true,
            quest_poi_reference_probability: 0.5,
            rng_seed: None,
            enforce_dead_character: false,
            spark_selection: SparkSelection::Random,
        }
    }
}

/// Admission and concurrency limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_turns_per_character_per_second: u32,
    pub max_concurrent_llm_calls: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_turns_per_character_per_second: 2,
            max_concurrent_llm_calls: 10,
        }
    }
}

/// Turn audit store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub max_entries: usize,
    pub ttl_seconds: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_seconds: 3_600,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` env-filter directive, e.g. `info` or `chronicler_runtime=debug`.
    pub level: String,
    pub json_format: bool,
    /// Fraction of turn-completion summaries to log (0.0–1.0).
    pub turn_log_sampling_rate: f64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            turn_log_sampling_rate: 1.0,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply environment
    /// overrides. Validation is the caller's next step.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| ConfigError::Io(e.to_string()))?;
                toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over file values. Only the
    /// deployment-sensitive subset is overridable.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CHRONICLER_JOURNEY_LOG_BASE_URL") {
            self.journey_log.base_url = url;
        }
        if let Ok(url) = std::env::var("CHRONICLER_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(key) = std::env::var("CHRONICLER_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("CHRONICLER_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(level) = std::env::var("CHRONICLER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(stub) = std::env::var("CHRONICLER_LLM_STUB_MODE") {
            self.llm.stub_mode = matches!(stub.as_str(), "1" | "true" | "yes");
        }
    }

    /// Validate the whole configuration. Returns the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_base_url("journey_log.base_url", &self.journey_log.base_url)?;
        if self.journey_log.retry_delay_base_ms > self.journey_log.retry_delay_max_ms {
            return Err(ConfigError::invalid(
                "journey_log.retry_delay_base_ms",
                "retry delay base must not exceed max",
            ));
        }
        if self.journey_log.timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "journey_log.timeout_seconds",
                "timeout must be positive",
            ));
        }

        validate_base_url("llm.base_url", &self.llm.base_url)?;
        if self.llm.retry_delay_base_ms > self.llm.retry_delay_max_ms {
            return Err(ConfigError::invalid(
                "llm.retry_delay_base_ms",
                "retry delay base must not exceed max",
            ));
        }
        if !self.llm.stub_mode {
            match &self.llm.api_key {
                Some(key) if !key.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::MissingRequired {
                        key: "llm.api_key".to_string(),
                    })
                }
            }
        }

        self.policy.validate()?;

        if self.limits.max_turns_per_character_per_second == 0 {
            return Err(ConfigError::invalid(
                "limits.max_turns_per_character_per_second",
                "rate must be at least 1",
            ));
        }
        if self.limits.max_concurrent_llm_calls == 0 {
            return Err(ConfigError::invalid(
                "limits.max_concurrent_llm_calls",
                "concurrency must be at least 1",
            ));
        }

        if self.audit.max_entries == 0 {
            return Err(ConfigError::invalid(
                "audit.max_entries",
                "capacity must be at least 1",
            ));
        }

        validate_probability(
            "logging.turn_log_sampling_rate",
            self.logging.turn_log_sampling_rate,
        )?;

        Ok(())
    }
}

impl PolicyConfig {
    /// Validate policy values in isolation; used both at startup and on
    /// admin reload.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_probability("policy.quest_trigger_probability", self.quest_trigger_probability)?;
        validate_probability("policy.poi_trigger_probability", self.poi_trigger_probability)?;
        validate_probability("policy.memory_spark_probability", self.memory_spark_probability)?;
        validate_probability(
            "policy.quest_poi_reference_probability",
            self.quest_poi_reference_probability,
        )?;
        if !(1..=20).contains(&self.memory_spark_count) {
            return Err(ConfigError::invalid(
                "policy.memory_spark_count",
                "must be between 1 and 20",
            ));
        }
        Ok(())
    }
}

fn validate_probability(key: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(ConfigError::invalid(key, "must be within [0.0, 1.0]"));
    }
    Ok(())
}

fn validate_base_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::invalid(key, e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::invalid(key, "URL scheme must be http or https"));
    }
    Ok(())
}

/// Holds the active policy configuration as an atomically swappable
/// immutable snapshot. Turns load the snapshot once at admit and use it for
/// the whole turn; an admin reload never changes a turn mid-flight.
pub struct PolicyConfigManager {
    current: ArcSwap<PolicyConfig>,
    previous: parking_lot::Mutex<Option<Arc<PolicyConfig>>>,
}

impl PolicyConfigManager {
    pub fn new(initial: PolicyConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            previous: parking_lot::Mutex::new(None),
        }
    }

    /// The active snapshot.
    pub fn snapshot(&self) -> Arc<PolicyConfig> {
        self.current.load_full()
    }

    /// Validate and atomically install a new policy configuration. On
    /// success the replaced snapshot is retained for [`Self::rollback`].
    /// On failure the active configuration is untouched.
    pub fn apply(&self, new_config: PolicyConfig) -> Result<(), ConfigError> {
        new_config.validate()?;
        let old = self.current.swap(Arc::new(new_config));
        *self.previous.lock() = Some(old);
        tracing::info!("policy configuration reloaded");
        Ok(())
    }

    /// Re-install the previously replaced snapshot, if any.
    pub fn rollback(&self) -> bool {
        let mut previous = self.previous.lock();
        match previous.take() {
            Some(old) => {
                let replaced = self.current.swap(old);
                *previous = Some(replaced);
                tracing::info!("policy configuration rolled back");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_validates_in_stub_mode() {
        let mut config = Config::default();
        config.llm.stub_mode = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_api_key_required_outside_stub_mode() {
        let mut config = Config::default();
        config.llm.stub_mode = false;
        config.llm.api_key = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));

        config.llm.api_key = Some("  ".to_string());
        assert!(config.validate().is_err());

        config.llm.api_key = Some("sk-test".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_probability_bounds() {
        let mut config = Config::default();
        config.llm.stub_mode = true;
        config.policy.quest_trigger_probability = 1.5;
        assert!(config.validate().is_err());

        config.policy.quest_trigger_probability = 1.0;
        assert!(config.validate().is_ok());

        config.policy.memory_spark_probability = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_spark_count_bounds() {
        let mut config = Config::default();
        config.llm.stub_mode = true;
        config.policy.memory_spark_count = 0;
        assert!(config.validate().is_err());
        config.policy.memory_spark_count = 21;
        assert!(config.validate().is_err());
        config.policy.memory_spark_count = 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_base_must_not_exceed_max() {
        let mut config = Config::default();
        config.llm.stub_mode = true;
        config.journey_log.retry_delay_base_ms = 10_000;
        config.journey_log.retry_delay_max_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_url_must_have_http_scheme() {
        let mut config = Config::default();
        config.llm.stub_mode = true;
        config.journey_log.base_url = "localhost:8800".to_string();
        assert!(config.validate().is_err());
        config.journey_log.base_url = "ftp://host".to_string();
        assert!(config.validate().is_err());
        config.journey_log.base_url = "https://host/api".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[journey_log]
base_url = "http://store:9000"
timeout_seconds = 5
recent_n = 4
max_retries = 2
retry_delay_base_ms = 100
retry_delay_max_ms = 1000

[policy]
quest_trigger_probability = 0.5
quest_cooldown_turns = 2
poi_trigger_probability = 0.5
poi_cooldown_turns = 1
memory_spark_probability = 0.1
memory_spark_count = 2
memory_sparks_enabled = true
quest_poi_reference_probability = 0.0
enforce_dead_character = false
spark_selection = "random"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.journey_log.base_url, "http://store:9000");
        assert_eq!(config.journey_log.recent_n, 4);
        assert_eq!(config.policy.quest_cooldown_turns, 2);
        // Untouched sections fall back to defaults.
        assert_eq!(config.limits.max_turns_per_character_per_second, 2);
    }

    #[test]
    fn test_policy_manager_apply_and_rollback() {
        let manager = PolicyConfigManager::new(PolicyConfig::default());
        let initial_quest_p = manager.snapshot().quest_trigger_probability;

        let mut updated = PolicyConfig::default();
        updated.quest_trigger_probability = 0.99;
        manager.apply(updated).unwrap();
        assert!((manager.snapshot().quest_trigger_probability - 0.99).abs() < f64::EPSILON);

        assert!(manager.rollback());
        assert!(
            (manager.snapshot().quest_trigger_probability - initial_quest_p).abs() < f64::EPSILON
        );

        // Rolling back again returns to the rejected-then-restored snapshot.
        assert!(manager.rollback());
        assert!((manager.snapshot().quest_trigger_probability - 0.99).abs() < f64::EPSILON);
    }

    #[test]
    fn test_policy_manager_rejects_invalid_reload() {
        let manager = PolicyConfigManager::new(PolicyConfig::default());
        let mut bad = PolicyConfig::default();
        bad.memory_spark_count = 0;
        assert!(manager.apply(bad).is_err());
        // Active snapshot untouched.
        assert_eq!(manager.snapshot().memory_spark_count, 3);
        assert!(!manager.rollback());
    }
}
