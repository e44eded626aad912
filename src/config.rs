// config.rs - Bot Configuration
// Settings come from an optional botconfig.txt (KEY=VALUE lines, # comments)
// searched in a few well-known locations, overlaid with the process
// environment. The environment always wins.

use log::{debug, info};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::slack::DEFAULT_API_BASE;

pub const CONFIG_FILE_PATHS: [&str; 4] = [
    "botconfig.txt",
    "../botconfig.txt",
    "../../botconfig.txt",
    "src/botconfig.txt",
];

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MODEL: &str = "chatgpt-4o-latest";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;

const KNOWN_KEYS: [&str; 9] = [
    "SLACK_BOT_TOKEN",
    "SLACK_SIGNING_SECRET",
    "OPENAI_API_KEY",
    "OPENAI_MODEL",
    "OPENAI_BASE_URL",
    "SLACK_API_BASE",
    "PORT",
    "FETCH_TIMEOUT_SECS",
    "LLM_TIMEOUT_SECS",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set (add it to botconfig.txt or the environment)")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Settings for the chat completion backend
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub slack_bot_token: String,
    pub slack_signing_secret: String,
    pub slack_api_base: String,
    pub port: u16,
    pub fetch_timeout: Duration,
    pub llm: LlmConfig,
}

impl LlmConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_map(&gather_settings())
    }

    pub fn from_map(settings: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: required(settings, "OPENAI_API_KEY")?,
            model: optional(settings, "OPENAI_MODEL", DEFAULT_MODEL.to_string())?,
            base_url: optional(settings, "OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL.to_string())?,
            timeout: Duration::from_secs(optional(
                settings,
                "LLM_TIMEOUT_SECS",
                DEFAULT_LLM_TIMEOUT_SECS,
            )?),
        })
    }
}

impl BotConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_map(&gather_settings())
    }

    pub fn from_map(settings: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            slack_bot_token: required(settings, "SLACK_BOT_TOKEN")?,
            slack_signing_secret: required(settings, "SLACK_SIGNING_SECRET")?,
            slack_api_base: optional(settings, "SLACK_API_BASE", DEFAULT_API_BASE.to_string())?,
            port: optional(settings, "PORT", DEFAULT_PORT)?,
            fetch_timeout: Duration::from_secs(optional(
                settings,
                "FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?),
            llm: LlmConfig::from_map(settings)?,
        })
    }
}

/// Parse KEY=VALUE lines. Blank lines, comments and lines without `=` are skipped.
pub fn parse_config(content: &str) -> HashMap<String, String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut settings = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            settings.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    settings
}

/// First botconfig.txt found, if any.
fn read_config_file() -> Option<HashMap<String, String>> {
    for path in CONFIG_FILE_PATHS {
        if let Ok(content) = fs::read_to_string(path) {
            info!("✅ Configuration loaded from {}", path);
            return Some(parse_config(&content));
        }
    }
    debug!("📄 No botconfig.txt found, using environment only");
    None
}

fn gather_settings() -> HashMap<String, String> {
    let mut settings = read_config_file().unwrap_or_default();
    for key in KNOWN_KEYS {
        if let Ok(value) = env::var(key) {
            settings.insert(key.to_string(), value.trim().to_string());
        }
    }
    settings
}

fn required(settings: &HashMap<String, String>, key: &'static str) -> Result<String, ConfigError> {
    match settings.get(key) {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn optional<T: FromStr>(
    settings: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match settings.get(key) {
        Some(value) if !value.is_empty() => value.parse().map_err(|_| ConfigError::Invalid {
            key,
            value: value.clone(),
        }),
        _ => Ok(default),
    }
}
