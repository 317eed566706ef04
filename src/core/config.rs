//! Persisted user settings.
//!
//! The settings file is plain TOML in the platform config directory. Only
//! [`Settings::client_config`] and [`Settings::chat_settings`] cross into the
//! protocol layers; nothing else in the crate reads the file.

use std::env;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::chat_stream::ClientConfig;
use crate::core::session::ChatSettings;

/// Address used when no server has been configured.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:1234/v1";
pub const DEFAULT_API_KEY: &str = "lm-studio";

pub const ENV_BASE_URL: &str = "LMCHAT_BASE_URL";
pub const ENV_API_KEY: &str = "LMCHAT_API_KEY";
pub const ENV_MODEL: &str = "LMCHAT_MODEL";

const TEMPERATURE_RANGE: RangeInclusive<f32> = 0.0..=2.0;
const MAX_TOKENS_RANGE: RangeInclusive<u32> = 1..=32_000;
const CONTEXT_WINDOW_RANGE: RangeInclusive<u32> = 512..=200_000;

/// Keys accepted by [`Settings::set_value`], in display order.
pub const SETTING_KEYS: &[&str] = &[
    "base-url",
    "api-key",
    "model",
    "temperature",
    "max-tokens",
    "context-window",
    "system-prompt",
    "model-prefix-filter",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub api_key: String,
    pub selected_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Stored for display; history is never truncated to fit it.
    pub context_window: u32,
    pub system_prompt: String,
    /// Only models whose id starts with this are listed.
    pub model_prefix_filter: String,
    pub server_configured: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: DEFAULT_API_KEY.to_string(),
            selected_model: String::new(),
            temperature: 0.7,
            max_tokens: 2048,
            context_window: 4096,
            system_prompt: String::new(),
            model_prefix_filter: String::new(),
            server_configured: false,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// The platform has no usable config directory (no home directory).
    NoConfigDir,
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoConfigDir => write!(f, "Could not determine a config directory"),
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config at {}: {}", path.display(), source)
            }
            ConfigError::Write { path, source } => {
                write!(f, "Failed to write config at {}: {}", path.display(), source)
            }
            ConfigError::Serialize(source) => write!(f, "Failed to serialize config: {source}"),
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::NoConfigDir => None,
            ConfigError::Read { source, .. } | ConfigError::Write { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Serialize(source) => Some(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingError {
    UnknownKey(String),
    InvalidValue {
        key: &'static str,
        value: String,
        expected: String,
    },
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(
                f,
                "Unknown config key: {key} (expected one of: {})",
                SETTING_KEYS.join(", ")
            ),
            SettingError::InvalidValue {
                key,
                value,
                expected,
            } => write!(f, "Invalid value for {key}: {value:?} (expected {expected})"),
        }
    }
}

impl StdError for SettingError {}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "lmchat", "lmchat")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from_path(&path)
    }

    /// Missing files yield the defaults; missing keys take their default value.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to_path(&path)
    }

    /// Writes a temp file next to `path` and renames it into place.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(write_err)?;
        }

        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(write_err)?;

        temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
        temp_file.as_file_mut().sync_all().map_err(write_err)?;
        temp_file.persist(path).map_err(|err| write_err(err.error))?;
        debug!(path = %path.display(), "Saved config");
        Ok(())
    }

    /// Apply `LMCHAT_*` environment overrides. They affect this run only.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| env::var(name).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(api_key) = lookup(ENV_API_KEY) {
            self.api_key = api_key;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            self.selected_model = model;
        }
    }

    /// The configured base address, or the local default when none is set.
    pub fn effective_base_url(&self) -> &str {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            DEFAULT_SERVER_URL
        } else {
            base_url
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.effective_base_url().to_string(),
            api_key: self.api_key.clone(),
        }
    }

    pub fn chat_settings(&self) -> ChatSettings {
        ChatSettings {
            model: self.selected_model.clone(),
            system_prompt: self.system_prompt.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Set a value by its CLI key. Nothing is saved.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), SettingError> {
        match key {
            "base-url" => self.base_url = value.trim().to_string(),
            "api-key" => self.api_key = value.trim().to_string(),
            "model" => self.selected_model = value.trim().to_string(),
            "temperature" => {
                self.temperature = parse_in_range("temperature", value, TEMPERATURE_RANGE)?
            }
            "max-tokens" => self.max_tokens = parse_in_range("max-tokens", value, MAX_TOKENS_RANGE)?,
            "context-window" => {
                self.context_window =
                    parse_in_range("context-window", value, CONTEXT_WINDOW_RANGE)?
            }
            "system-prompt" => self.system_prompt = value.to_string(),
            "model-prefix-filter" => self.model_prefix_filter = value.trim().to_string(),
            _ => return Err(SettingError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn format_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "base-url" if self.base_url.is_empty() => {
                format!("(unset, using {DEFAULT_SERVER_URL})")
            }
            "base-url" => self.base_url.clone(),
            "api-key" => mask_secret(&self.api_key),
            "model" => or_unset(&self.selected_model),
            "temperature" => self.temperature.to_string(),
            "max-tokens" => self.max_tokens.to_string(),
            "context-window" => self.context_window.to_string(),
            "system-prompt" => or_unset(&self.system_prompt),
            "model-prefix-filter" => or_unset(&self.model_prefix_filter),
            _ => return None,
        };
        Some(value)
    }

    pub fn print_all(&self) {
        println!("Current configuration:");
        for key in SETTING_KEYS {
            if let Some(value) = self.format_value(key) {
                println!("  {key}: {value}");
            }
        }
        match Self::config_path() {
            Some(path) => println!("  (stored in {})", path.display()),
            None => println!("  (no config directory available)"),
        }
    }
}

fn parse_in_range<T>(
    key: &'static str,
    value: &str,
    range: RangeInclusive<T>,
) -> Result<T, SettingError>
where
    T: std::str::FromStr + PartialOrd + fmt::Display,
{
    let invalid = || SettingError::InvalidValue {
        key,
        value: value.to_string(),
        expected: format!("a number from {} to {}", range.start(), range.end()),
    };
    let parsed = value.trim().parse::<T>().map_err(|_| invalid())?;
    if range.contains(&parsed) {
        Ok(parsed)
    } else {
        Err(invalid())
    }
}

fn or_unset(value: &str) -> String {
    if value.trim().is_empty() {
        "(unset)".to_string()
    } else {
        value.to_string()
    }
}

fn mask_secret(secret: &str) -> String {
    let secret = secret.trim();
    if secret.is_empty() {
        return "(unset)".to_string();
    }
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}
