//! TOML Configuration File Support
//!
//! Centralized configuration loading for the bot, with an optional TOML file
//! at `$XDG_CONFIG_HOME/hopevpn/bot.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! The Telegram bot token is never read from the file.
//!
//! # Example Configuration
//!
//! ```toml
//! [api]
//! base_url = "http://localhost:3000"
//! fast_timeout_secs = 5
//! slow_timeout_secs = 30
//! provisioning_timeout_secs = 60
//!
//! [telegram]
//! poll_timeout_secs = 30
//! max_concurrent_turns = 64
//!
//! [security]
//! max_token_length = 4096
//! max_turns_per_minute = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::GatewayTimeouts;
use crate::security::ConductorLimits;

/// Default backend API location
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// `[api]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiToml {
    /// Backend base URL
    pub base_url: Option<String>,
    /// Timeout for quick reads
    pub fast_timeout_secs: Option<u64>,
    /// Timeout for slow mutations
    pub slow_timeout_secs: Option<u64>,
    /// Timeout for provisioning work
    pub provisioning_timeout_secs: Option<u64>,
}

/// `[telegram]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramToml {
    /// Long-poll timeout
    pub poll_timeout_secs: Option<u64>,
    /// Upper bound on turns processed at once
    pub max_concurrent_turns: Option<usize>,
}

/// `[security]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityToml {
    /// Maximum token length
    pub max_token_length: Option<usize>,
    /// Per-user turn limit
    pub max_turns_per_minute: Option<u32>,
}

/// Root of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotToml {
    /// Backend settings
    pub api: ApiToml,
    /// Transport settings
    pub telegram: TelegramToml,
    /// Input limits
    pub security: SecurityToml,
}

/// Resolved configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotConfig {
    /// Backend base URL, without trailing slash
    pub api_base_url: String,
    /// Per-class backend timeouts
    pub timeouts: GatewayTimeouts,
    /// Long-poll timeout for `getUpdates`
    pub poll_timeout: Duration,
    /// Upper bound on concurrently processed turns
    pub max_concurrent_turns: usize,
    /// Input limits
    pub limits: ConductorLimits,
    /// Telegram bot token, from CLI or environment only
    pub telegram_token: Option<String>,
    /// File the configuration was read from, if any
    pub config_file_path: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeouts: GatewayTimeouts::default(),
            poll_timeout: Duration::from_secs(30),
            max_concurrent_turns: 64,
            limits: ConductorLimits::default(),
            telegram_token: None,
            config_file_path: None,
        }
    }
}

impl BotConfig {
    /// Check values that would make the bot unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty base URL, a zero
    /// timeout or a zero concurrency bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "api base_url must not be empty".to_string(),
            ));
        }
        let timeouts = [
            ("fast_timeout_secs", self.timeouts.fast),
            ("slow_timeout_secs", self.timeouts.slow),
            ("provisioning_timeout_secs", self.timeouts.provisioning),
            ("poll_timeout_secs", self.poll_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.max_concurrent_turns == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_turns must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Values given on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// `--api-base-url`
    pub api_base_url: Option<String>,
    /// `--telegram-token`
    pub telegram_token: Option<String>,
}

impl ConfigOverrides {
    /// Apply on top of a loaded configuration
    pub fn apply(&self, config: &mut BotConfig) {
        if let Some(ref url) = self.api_base_url {
            config.api_base_url = normalize_base_url(url);
        }
        if let Some(ref token) = self.telegram_token {
            config.telegram_token = Some(token.clone());
        }
    }
}

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/hopevpn/bot.toml` or `~/.config/hopevpn/bot.toml`
/// if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("hopevpn").join("bot.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<BotConfig, ConfigError> {
    load_config_from_path(default_config_path().as_deref())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<&Path>) -> Result<BotConfig, ConfigError> {
    let mut config = load_file_config(path)?;
    apply_env_config_from(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Defaults plus the TOML file, without environment overrides
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_file_config(path: Option<&Path>) -> Result<BotConfig, ConfigError> {
    let mut config = BotConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.to_path_buf(),
                    source: e,
                })?;

            let toml_config: BotToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.to_path_buf());

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    Ok(config)
}

fn apply_toml_config(config: &mut BotConfig, toml: &BotToml) {
    if let Some(ref url) = toml.api.base_url {
        config.api_base_url = normalize_base_url(url);
    }
    if let Some(secs) = toml.api.fast_timeout_secs {
        config.timeouts.fast = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.api.slow_timeout_secs {
        config.timeouts.slow = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.api.provisioning_timeout_secs {
        config.timeouts.provisioning = Duration::from_secs(secs);
    }

    if let Some(secs) = toml.telegram.poll_timeout_secs {
        config.poll_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = toml.telegram.max_concurrent_turns {
        config.max_concurrent_turns = n;
    }

    if let Some(len) = toml.security.max_token_length {
        config.limits.max_token_length = len;
    }
    if let Some(n) = toml.security.max_turns_per_minute {
        config.limits.max_turns_per_minute = n;
    }
}

/// Apply environment overrides read through `lookup`
///
/// Unparseable numeric values are ignored with a warning.
pub fn apply_env_config_from<F>(config: &mut BotConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("API_BASE_URL") {
        config.api_base_url = normalize_base_url(&url);
    }
    if let Some(token) = lookup("TELEGRAM_BOT_TOKEN") {
        if !token.trim().is_empty() {
            config.telegram_token = Some(token.trim().to_string());
        }
    }

    if let Some(secs) = parse_env::<u64>(&lookup, "HOPEVPN_FAST_TIMEOUT_SECS") {
        config.timeouts.fast = Duration::from_secs(secs);
    }
    if let Some(secs) = parse_env::<u64>(&lookup, "HOPEVPN_SLOW_TIMEOUT_SECS") {
        config.timeouts.slow = Duration::from_secs(secs);
    }
    if let Some(secs) = parse_env::<u64>(&lookup, "HOPEVPN_PROVISIONING_TIMEOUT_SECS") {
        config.timeouts.provisioning = Duration::from_secs(secs);
    }
    if let Some(secs) = parse_env::<u64>(&lookup, "HOPEVPN_POLL_TIMEOUT_SECS") {
        config.poll_timeout = Duration::from_secs(secs);
    }
    if let Some(len) = parse_env::<usize>(&lookup, "HOPEVPN_MAX_TOKEN_LENGTH") {
        config.limits.max_token_length = len;
    }
    if let Some(n) = parse_env::<u32>(&lookup, "HOPEVPN_MAX_TURNS_PER_MINUTE") {
        config.limits.max_turns_per_minute = n;
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.timeouts.fast, Duration::from_secs(5));
        assert_eq!(config.timeouts.slow, Duration::from_secs(30));
        assert_eq!(config.timeouts.provisioning, Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_file_config(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config, BotConfig::default());
    }

    #[test]
    fn test_file_values_apply() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[api]\nbase_url = \"http://api.internal:8080/\"\nslow_timeout_secs = 45\n\n\
             [telegram]\nmax_concurrent_turns = 8\n\n[security]\nmax_turns_per_minute = 5"
        )
        .unwrap();

        let config = load_file_config(Some(file.path())).unwrap();
        assert_eq!(config.api_base_url, "http://api.internal:8080");
        assert_eq!(config.timeouts.slow, Duration::from_secs(45));
        assert_eq!(config.timeouts.fast, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_turns, 8);
        assert_eq!(config.limits.max_turns_per_minute, 5);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api\nbase_url = ").unwrap();
        assert!(matches!(
            load_file_config(Some(file.path())),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_env_overrides_file_and_cli_overrides_env() {
        let mut config = BotConfig {
            api_base_url: "http://from-file".to_string(),
            ..Default::default()
        };
        apply_env_config_from(
            &mut config,
            env(&[
                ("API_BASE_URL", "http://from-env/"),
                ("TELEGRAM_BOT_TOKEN", " 123:abc "),
                ("HOPEVPN_FAST_TIMEOUT_SECS", "2"),
                ("HOPEVPN_MAX_TURNS_PER_MINUTE", "not-a-number"),
            ]),
        );
        assert_eq!(config.api_base_url, "http://from-env");
        assert_eq!(config.telegram_token.as_deref(), Some("123:abc"));
        assert_eq!(config.timeouts.fast, Duration::from_secs(2));
        assert_eq!(config.limits.max_turns_per_minute, 30);

        ConfigOverrides {
            api_base_url: Some("http://from-cli".to_string()),
            telegram_token: None,
        }
        .apply(&mut config);
        assert_eq!(config.api_base_url, "http://from-cli");
        assert_eq!(config.telegram_token.as_deref(), Some("123:abc"));
    }

    #[test]
    fn test_validation() {
        let mut config = BotConfig::default();
        config.timeouts.slow = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let config = BotConfig {
            api_base_url: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
