/*!
common/src/lib.rs

Shared configuration types for Brightside.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file, with default + override merging
- Accessors that resolve the upstream LLM endpoint, model and API key
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Chat-completions endpoint used when `llm.api_url` is not set
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
/// Environment variable holding the bearer credential when `llm.api_key_env` is not set
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Model requested when `llm.model` is not set
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
/// Largest accepted JSON request body, in MiB, when `server.body_limit_mib` is not set
pub const DEFAULT_BODY_LIMIT_MIB: u64 = 5;

/// HTTP listener configuration section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (e.g. "0.0.0.0")
    pub bind: Option<String>,
    pub port: Option<u16>,
    /// Largest JSON request body accepted, in MiB. Larger bodies get a 413.
    pub body_limit_mib: Option<u64>,
}

impl ServerConfig {
    pub fn body_limit_mib(&self) -> u64 {
        self.body_limit_mib.unwrap_or(DEFAULT_BODY_LIMIT_MIB)
    }
}

/// Upstream chat-completion API configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    /// Name of the env var holding the API key. The key itself never lives in the file.
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    /// Upper bound on a single upstream call. Unset means wait for the upstream.
    pub timeout_seconds: Option<u64>,
}

impl LlmConfig {
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    /// Parse the configured endpoint, failing early on a malformed URL.
    pub fn endpoint(&self) -> Result<Url> {
        Url::parse(self.api_url())
            .with_context(|| format!("Invalid llm.api_url: {}", self.api_url()))
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Read the API key from the configured environment variable.
    /// An empty value counts as missing.
    pub fn read_api_key(&self) -> Option<String> {
        std::env::var(self.api_key_env())
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    /// Missing files are skipped, so with neither present every default applies.
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for (path, label) in [(default_path, "default"), (override_path, "override")] {
            let Some(path) = path else { continue };
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {} config: {}", label, path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse {} configuration", label))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}
