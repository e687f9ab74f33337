//! Visibility configuration.
//!
//! ```json
//! { "enabled": true, "automigrate": "start", "narrow_heads": false }
//! ```
//!
//! Every field is optional.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Target mode for the once-per-session migration check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoMigrate {
    /// Switch to explicit tracking of visible heads.
    Start,
    /// Revert to visibility derived from obsolescence markers.
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Use the tracked heads to decide visibility when tracking is on.
    pub enabled: bool,
    pub automigrate: Option<AutoMigrate>,
    /// Visible draft commits are exactly the ancestors of the tracked heads,
    /// nothing needs to be filtered out.
    pub narrow_heads: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            automigrate: None,
            narrow_heads: false,
        }
    }
}

#[derive(Debug)]
pub struct ConfigError(serde_json::Error);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid visibility config: {}", self.0)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(ConfigError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
        assert!(Config::default().enabled);
    }

    #[test]
    fn parses_automigrate() {
        let config = Config::from_json(r#"{"automigrate": "stop", "narrow_heads": true}"#).unwrap();
        assert_eq!(config.automigrate, Some(AutoMigrate::Stop));
        assert!(config.narrow_heads);
        assert!(config.enabled);
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(Config::from_json(r#"{"enable": false}"#).is_err());
        assert!(Config::from_json(r#"{"automigrate": "sometimes"}"#).is_err());
    }
}
