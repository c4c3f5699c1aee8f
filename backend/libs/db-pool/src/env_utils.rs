//! Environment variable parsing helpers shared by the pool and service configs.
//!
//! Absent variables fall back to defaults. Variables that are present but
//! cannot be parsed are reported by the `strict` variants so a typo in a
//! deployment manifest is not silently replaced by a default.

use std::fmt;
use std::str::FromStr;

/// A variable was set but its value could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvParseError {
    pub key: String,
    pub value: String,
}

impl fmt::Display for EnvParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "environment variable {} has invalid value {:?}",
            self.key, self.value
        )
    }
}

impl std::error::Error for EnvParseError {}

/// Read a variable, treating empty strings as unset
pub fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a variable, falling back to `default` when it is unset or invalid
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    env_value(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a variable, `Ok(None)` when unset and an error when set but invalid
pub fn parse_env_strict<T: FromStr>(key: &str) -> Result<Option<T>, EnvParseError> {
    match env_value(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| EnvParseError {
                key: key.to_string(),
                value,
            }),
    }
}

/// Parse a boolean flag; accepts `true/false`, `1/0`, `yes/no`, `on/off`
pub fn parse_env_flag(key: &str) -> Result<Option<bool>, EnvParseError> {
    match env_value(key) {
        None => Ok(None),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(EnvParseError {
                key: key.to_string(),
                value,
            }),
        },
    }
}
