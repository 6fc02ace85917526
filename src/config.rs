// ABOUTME: Configuration loading for modelrelay.
// ABOUTME: Reads ~/.modelrelay/config.toml with serde defaults for every field.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub llm: LlmConfig,
    pub compaction: CompactionConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    /// Seconds to wait for the vendor to start responding.
    pub connect_timeout_seconds: u64,
    pub anthropic: VendorConfig,
    pub openai: VendorConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            connect_timeout_seconds: 30,
            anthropic: VendorConfig::default(),
            openai: VendorConfig::default(),
        }
    }
}

/// Per-vendor overrides, mainly for proxies and local gateways.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub base_url: Option<String>,
}

/// History compaction configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Hard cap on the compaction trigger, below the model's 90% default.
    pub threshold_token_limit: Option<u64>,
    /// Token budget for messages retained verbatim after compaction.
    pub retained_budget_tokens: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_token_limit: None,
            retained_budget_tokens: 20_000,
        }
    }
}

impl EngineConfig {
    /// Load config from ~/.modelrelay/config.toml, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    fn base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".modelrelay")
    }

    /// Path to the config file.
    pub fn config_path() -> PathBuf {
        Self::base_dir().join("config.toml")
    }

    /// Path to the secrets settings file.
    pub fn settings_path() -> PathBuf {
        Self::base_dir().join("settings.json")
    }

    /// Directory holding persisted conversations.
    pub fn conversations_dir() -> PathBuf {
        Self::base_dir().join("conversations")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.llm.connect_timeout_seconds, 30);
        assert!(config.compaction.enabled);
        assert_eq!(config.compaction.retained_budget_tokens, 20_000);
    }

    #[test]
    fn parse_config_toml() {
        let toml_str = r#"
[llm]
provider = "openai"
model = "gpt-4o"
max_tokens = 2048

[llm.openai]
base_url = "http://localhost:8080/v1"

[compaction]
enabled = false
retained_budget_tokens = 5000
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 2048);
        assert_eq!(
            config.llm.openai.base_url.as_deref(),
            Some("http://localhost:8080/v1")
        );
        assert!(!config.compaction.enabled);
        assert_eq!(config.compaction.retained_budget_tokens, 5000);
    }

    #[test]
    fn parse_partial_config_uses_defaults() {
        let toml_str = r#"
[llm]
provider = "openai"
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "claude-sonnet-4-20250514");
        assert!(config.compaction.enabled);
        assert_eq!(config.compaction.threshold_token_limit, None);
    }
}
