//! Chatgen Configuration
//!
//! TOML configuration loading with defaults and validation

use chatgen_providers::ProviderId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub ack_typing_delay_ms: Option<u64>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            ack_typing_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_iterations: default_max_iterations(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_command_ttl_days")]
    pub command_ttl_days: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            command_ttl_days: default_command_ttl_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,
    #[serde(default)]
    pub http_retry: Option<RetryPolicyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Task kinds served by this endpoint. Empty means the provider's built-in capabilities.
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// Overrides for the built-in per-task provider orders.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FallbackConfig {
    #[serde(default)]
    pub image: Option<Vec<String>>,
    #[serde(default)]
    pub video: Option<Vec<String>>,
    #[serde(default)]
    pub audio: Option<Vec<String>>,
    #[serde(default)]
    pub image_edit: Option<Vec<String>>,
}

impl FallbackConfig {
    pub fn lists(&self) -> Vec<(&'static str, &[String])> {
        let mut out = Vec::new();
        if let Some(list) = &self.image {
            out.push(("image", list.as_slice()));
        }
        if let Some(list) = &self.video {
            out.push(("video", list.as_slice()));
        }
        if let Some(list) = &self.audio {
            out.push(("audio", list.as_slice()));
        }
        if let Some(list) = &self.image_edit {
            out.push(("image_edit", list.as_slice()));
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub window_secs: Option<u64>,
    pub initial_delay_secs: Option<u64>,
    pub backoff_factor: Option<u32>,
    pub max_delay_secs: Option<u64>,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_max_iterations() -> usize {
    8
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_command_ttl_days() -> u64 {
    30
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chatgen").join("config.toml"))
    }

    pub fn data_dir(&self) -> std::path::PathBuf {
        self.core
            .data_dir
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(std::path::PathBuf::from)
            .or_else(|| dirs::data_dir().map(|dir| dir.join("chatgen")))
            .unwrap_or_else(|| std::path::PathBuf::from(".chatgen"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut provider_names = HashSet::new();
        for provider in &self.providers.providers {
            let name = provider.name.trim();
            if name.is_empty() {
                anyhow::bail!("Provider name cannot be empty");
            }
            // Aliases name the same backend: `gemini` and `google` are one provider.
            let key = name
                .parse::<ProviderId>()
                .map(|id| id.as_str().to_string())
                .unwrap_or_else(|_| name.to_lowercase());
            if !provider_names.insert(key) {
                anyhow::bail!("Duplicate provider name '{}'", name);
            }
            if provider.api_key.trim().is_empty() {
                anyhow::bail!("Provider '{}' has an empty api_key", name);
            }
            for task in &provider.tasks {
                if task.trim().is_empty() {
                    anyhow::bail!("Provider '{}' lists an empty task", name);
                }
            }
        }

        if let Some(fallback) = &self.providers.fallback {
            for (task, list) in fallback.lists() {
                if list.is_empty() {
                    anyhow::bail!("providers.fallback.{} cannot be empty", task);
                }
                let mut seen = HashSet::new();
                for entry in list {
                    let entry = entry.trim().to_lowercase();
                    if entry.is_empty() {
                        anyhow::bail!("providers.fallback.{} contains an empty entry", task);
                    }
                    let key = entry
                        .parse::<ProviderId>()
                        .map(|id| id.as_str().to_string())
                        .unwrap_or_else(|_| entry.clone());
                    if !seen.insert(key) {
                        anyhow::bail!(
                            "providers.fallback.{} lists provider '{}' more than once",
                            task,
                            entry
                        );
                    }
                }
            }
        }

        if self.agent.timeout_ms == 0 {
            anyhow::bail!("agent.timeout_ms must be > 0");
        }
        if self.agent.max_iterations == 0 {
            anyhow::bail!("agent.max_iterations must be > 0");
        }

        let language = self.chat.language.trim().to_lowercase();
        if !matches!(language.as_str(), "he" | "hebrew" | "en" | "english") {
            anyhow::bail!(
                "chat.language '{}' is unsupported (supported: he, en)",
                self.chat.language
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    fn parse_config(input: &str) -> Config {
        let cfg: Config = toml::from_str(input).expect("valid TOML");
        cfg
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = parse_config("");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.retry.command_ttl_days, 30);
        assert_eq!(cfg.agent.max_iterations, 8);
        assert_eq!(cfg.agent.timeout_ms, 300_000);
        assert_eq!(cfg.chat.language, "en");
    }

    #[test]
    fn validate_rejects_duplicate_provider_names() {
        let cfg = parse_config(
            r#"
[[providers.providers]]
name = "openai"
api_key = "k"

[[providers.providers]]
name = "OpenAI"
api_key = "k2"
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_aliases_of_the_same_provider() {
        let cfg = parse_config(
            r#"
[[providers.providers]]
name = "gemini"
api_key = "k"

[[providers.providers]]
name = "google"
api_key = "k2"
"#,
        );
        let err = cfg.validate().expect_err("alias duplicate must fail");
        assert!(err.to_string().contains("'google'"), "{}", err);

        let cfg = parse_config(
            r#"
[providers.fallback]
video = ["veo", "kling", "veo3"]
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_fallback_entry() {
        let cfg = parse_config(
            r#"
[providers.fallback]
image = ["gemini", "openai", "gemini"]
"#,
        );
        let err = cfg.validate().expect_err("duplicate must fail");
        assert!(err.to_string().contains("more than once"), "{}", err);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let cfg = parse_config(
            r#"
[agent]
timeout_ms = 0
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_language() {
        let cfg = parse_config(
            r#"
[chat]
language = "fr"
"#,
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_full_provider_section() {
        let cfg = parse_config(
            r#"
[chat]
language = "he"
ack_typing_delay_ms = 400

[[providers.providers]]
name = "gemini"
api_key = "g"
base_url = "https://media.example/gemini"
tasks = ["image", "image_edit"]

[providers.fallback]
image_edit = ["openai", "gemini"]

[providers.http_retry]
window_secs = 60
"#,
        );
        assert!(cfg.validate().is_ok());
        let fallback = cfg.providers.fallback.expect("fallback");
        assert_eq!(
            fallback.image_edit.as_deref(),
            Some(&["openai".to_string(), "gemini".to_string()][..])
        );
        assert_eq!(cfg.providers.providers[0].tasks.len(), 2);
        assert_eq!(cfg.chat.ack_typing_delay_ms, Some(400));
    }
}
