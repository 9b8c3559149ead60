//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`. Each account is validated
//! independently: a broken account is skipped at startup while the rest
//! keep running.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{EngineError, StakePreset};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Directory for per-account state files and decisions logs.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Directory holding one JSONL event stream per account.
    #[serde(default = "default_events_dir")]
    pub events_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            events_dir: default_events_dir(),
        }
    }
}

fn default_state_dir() -> String {
    "state".to_string()
}

fn default_events_dir() -> String {
    "events".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Chat-completions endpoint of the model gateway.
    pub endpoint: String,
    pub api_key_env: String,
    /// Default model id; accounts may override.
    pub model: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotifyConfig {
    /// Push endpoint for priority-class notices. Absent = log only.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AccountConfig {
    pub name: String,
    /// Game-feed channel this account is bound to.
    pub channel: String,
    /// Starting wagering fund, in currency units.
    pub fund: i64,
    /// Model id override for this account.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub preset: StakePreset,
    /// Loss streak length that triggers the warning notification.
    #[serde(default)]
    pub warning_threshold: Option<u32>,
}

impl AccountConfig {
    /// Validate the account's bindings and preset. A failure here is
    /// fatal for this account only.
    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "account name is empty".into(),
            ));
        }
        if self.channel.trim().is_empty() {
            return Err(EngineError::InvalidConfiguration(format!(
                "account '{}' has no channel binding",
                self.name
            )));
        }
        if self.fund <= 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "account '{}' has a non-positive fund ({})",
                self.name, self.fund
            )));
        }
        if self.preset.initial_stake <= 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "account '{}' preset has a non-positive initial stake",
                self.name
            )));
        }
        if self.preset.lose_stop == 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "account '{}' preset allows zero consecutive wagers",
                self.name
            )));
        }
        if self.preset.multipliers.iter().any(|&m| m <= 0.0) {
            return Err(EngineError::InvalidConfiguration(format!(
                "account '{}' preset has a non-positive step multiplier",
                self.name
            )));
        }
        Ok(())
    }

    /// The model id this account predicts with.
    pub fn model_id(&self, default_model: &str) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| default_model.to_string())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    pub fn state_path(&self, account: &AccountConfig) -> PathBuf {
        Path::new(&self.engine.state_dir).join(format!("{}.state.json", account.name))
    }

    pub fn decisions_path(&self, account: &AccountConfig) -> PathBuf {
        Path::new(&self.engine.state_dir).join(format!("{}.decisions.log", account.name))
    }

    pub fn events_path(&self, account: &AccountConfig) -> PathBuf {
        Path::new(&self.engine.events_dir).join(format!("{}.events.jsonl", account.name))
    }
}
