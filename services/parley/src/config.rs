//! Application Configuration Module
//!
//! Loads settings from the environment (and a `.env` file, if present) into
//! one struct that the binary hands to each component.

use parley_core::config::DEFAULT_SYSTEM_INSTRUCTION;
use parley_core::{ResponseMode, Voice};
use secrecy::SecretString;
use std::env;
use tracing::Level;

pub const API_KEYS_VAR: &str = gemini_live::consts::GEMINI_API_KEYS;
pub const MODEL_VAR: &str = "PARLEY_MODEL";
pub const VOICE_VAR: &str = "PARLEY_VOICE";
pub const RESPONSE_MODE_VAR: &str = "PARLEY_RESPONSE_MODE";
pub const SYSTEM_INSTRUCTION_VAR: &str = "PARLEY_SYSTEM_INSTRUCTION";
pub const SHUFFLE_KEYS_VAR: &str = "PARLEY_SHUFFLE_KEYS";
pub const LOG_LEVEL_VAR: &str = "RUST_LOG";

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    pub api_keys: Vec<SecretString>,
    pub model: String,
    pub voice: Voice,
    pub response_mode: ResponseMode,
    pub system_instruction: String,
    pub shuffle_keys: bool,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// * `GEMINI_API_KEYS`: comma separated API keys, at least one. Required.
    /// * `PARLEY_MODEL`: defaults to `models/gemini-2.0-flash-exp`.
    /// * `PARLEY_VOICE`: Aoede, Charon, Fenrir, Kore or Puck. Defaults to Puck.
    /// * `PARLEY_RESPONSE_MODE`: `audio` or `text`. Defaults to `audio`.
    /// * `PARLEY_SYSTEM_INSTRUCTION`: free text.
    /// * `PARLEY_SHUFFLE_KEYS`: shuffle the key order once at startup.
    /// * `RUST_LOG`: TRACE, DEBUG, INFO, WARN or ERROR. Defaults to INFO.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Useful for local development; ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_keys = lookup(API_KEYS_VAR).ok_or_else(|| ConfigError::MissingVar(API_KEYS_VAR.to_string()))?;
        let api_keys: Vec<SecretString> = raw_keys
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| SecretString::from(k.to_string()))
            .collect();
        if api_keys.is_empty() {
            return Err(ConfigError::InvalidValue {
                var: API_KEYS_VAR.to_string(),
                message: "no API keys in list".to_string(),
            });
        }

        let model = lookup(MODEL_VAR)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| gemini_live::consts::DEFAULT_MODEL.to_string());

        let voice = match lookup(VOICE_VAR) {
            Some(v) => v.parse().map_err(|e| invalid(VOICE_VAR, e))?,
            None => Voice::default(),
        };

        let response_mode = match lookup(RESPONSE_MODE_VAR) {
            Some(m) => m.parse().map_err(|e| invalid(RESPONSE_MODE_VAR, e))?,
            None => ResponseMode::default(),
        };

        let system_instruction = lookup(SYSTEM_INSTRUCTION_VAR)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_INSTRUCTION.to_string());

        let shuffle_keys = match lookup(SHUFFLE_KEYS_VAR) {
            Some(flag) => parse_flag(&flag).ok_or_else(|| ConfigError::InvalidValue {
                var: SHUFFLE_KEYS_VAR.to_string(),
                message: format!("expected true or false, got {flag:?}"),
            })?,
            None => false,
        };

        let log_level_str = lookup(LOG_LEVEL_VAR).unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            api_keys,
            model,
            voice,
            response_mode,
            system_instruction,
            shuffle_keys,
            log_level,
        })
    }
}

fn invalid(var: &str, e: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        message: e.to_string(),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_with_only_keys() {
        let config = load(&[(API_KEYS_VAR, " key-a, ,key-b ")]).unwrap();
        let keys: Vec<&str> = config.api_keys.iter().map(|k| k.expose_secret()).collect();
        assert_eq!(keys, vec!["key-a", "key-b"]);
        assert_eq!(config.model, "models/gemini-2.0-flash-exp");
        assert_eq!(config.voice, Voice::Puck);
        assert_eq!(config.response_mode, ResponseMode::Audio);
        assert_eq!(config.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
        assert!(!config.shuffle_keys);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn missing_or_empty_keys_are_errors() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVar(_))));
        assert!(matches!(
            load(&[(API_KEYS_VAR, " , ")]),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            (API_KEYS_VAR, "k"),
            (VOICE_VAR, "charon"),
            (RESPONSE_MODE_VAR, "TEXT"),
            (SYSTEM_INSTRUCTION_VAR, "Translate to German."),
            (SHUFFLE_KEYS_VAR, "yes"),
            (LOG_LEVEL_VAR, "debug"),
        ])
        .unwrap();
        assert_eq!(config.voice, Voice::Charon);
        assert_eq!(config.response_mode, ResponseMode::Text);
        assert_eq!(config.system_instruction, "Translate to German.");
        assert!(config.shuffle_keys);
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            load(&[(API_KEYS_VAR, "k"), (VOICE_VAR, "Zephyr")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            load(&[(API_KEYS_VAR, "k"), (SHUFFLE_KEYS_VAR, "maybe")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            load(&[(API_KEYS_VAR, "k"), (LOG_LEVEL_VAR, "loud")]),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }
}
