use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::warn;

const APP_NAME: &str = "shelp";
const DEFAULT_MODEL: &str = "llama3.1";
const DEFAULT_ENDPOINT: &str = "http://localhost:11434/v1";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    /// Replaces the built-in system prompt when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            temperature: 0.2,
            max_tokens: 4096,
            request_timeout_secs: 120,
            system_prompt: None,
        }
    }
}

/// Pauses applied before backend requests and tool dispatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub request_delay_ms: u64,
    pub tool_call_delay_ms: u64,
}

impl RateLimitConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn tool_call_delay(&self) -> Duration {
        Duration::from_millis(self.tool_call_delay_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 7000,
            tool_call_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub auto_confirm: bool,
    pub max_iterations: usize,
    pub history_window: usize,
    pub record_history: bool,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            auto_confirm: false,
            max_iterations: 10,
            history_window: 10,
            record_history: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Literal substrings rejected on top of the built-in rules.
    pub dangerous_patterns: Vec<String>,
    pub command_timeout_secs: u64,
    pub max_output_lines: usize,
}

impl SafetyConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            dangerous_patterns: Vec::new(),
            command_timeout_secs: 300,
            max_output_lines: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub rate_limit: RateLimitConfig,
    pub behavior: BehaviorConfig,
    pub safety: SafetyConfig,
}

pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("config.toml")
}

pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Loads the user config, falling back to defaults when it is missing or broken.
pub fn load_config() -> Config {
    let path = get_config_path();
    if !path.exists() {
        return Config::default();
    }
    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "ignoring config file, using defaults");
            Config::default()
        }
    }
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[llm]\nmodel = \"gpt-4o-mini\"\n\n[behavior]\nmax_iterations = 4\n",
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.behavior.max_iterations, 4);
        assert_eq!(config.safety.command_timeout_secs, 300);
        assert_eq!(config.rate_limit.tool_call_delay_ms, 500);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.behavior.auto_confirm = true;
        config.llm.system_prompt = Some("be brief".to_string());
        config.safety.dangerous_patterns = vec!["systemctl stop sshd".to_string()];

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert!(loaded.behavior.auto_confirm);
        assert_eq!(loaded.llm.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(loaded.safety.dangerous_patterns, config.safety.dangerous_patterns);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[llm\nmodel = ").unwrap();
        assert!(matches!(
            load_config_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
