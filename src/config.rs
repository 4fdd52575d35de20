//! Engine Configuration
//!
//! Every tuning constant the rules consult lives in [`RulesConfig`].
//! Defaults reproduce the standard Showdown game; deployments can override
//! any subset from JSON.

use std::path::Path;

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Environment variable the server binary reads a config path from.
pub const CONFIG_ENV_VAR: &str = "SHOWDOWN_CONFIG";

/// Rule constants for play resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Innings in a regulation game.
    pub regulation_innings: u32,
    /// Inning from which any bench card may fill any position.
    pub late_game_inning: u32,
    /// Innings a starting pitcher must record before relief is allowed.
    pub starter_min_innings: u32,
    /// Faces on the die used for every roll.
    pub die_sides: u32,
    /// Speed surplus over defense that makes an advance automatic.
    pub auto_advance_margin: i32,
    /// Speed bonus for a runner heading home.
    pub home_bonus: i32,
    /// Speed bonus for extra-base attempts with two outs.
    pub two_out_bonus: i32,
    /// Speed penalty for tagging up to second.
    pub tag_to_second_penalty: i32,
    /// Speed penalty for stealing third.
    pub steal_third_penalty: i32,
    /// A fielding check with `roll + rating` at or below this is an error.
    pub fielding_error_margin: i32,
    /// Ground balls with a runner on first may become double plays.
    pub double_plays: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            regulation_innings: 9,
            late_game_inning: 7,
            starter_min_innings: 4,
            die_sides: 20,
            auto_advance_margin: 20,
            home_bonus: 5,
            two_out_bonus: 5,
            tag_to_second_penalty: 5,
            steal_third_penalty: 5,
            fielding_error_margin: 1,
            double_plays: true,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rule constants.
    pub rules: RulesConfig,
    /// Capacity of each game's event broadcast channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rules: RulesConfig::default(),
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject settings the rules cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rules = &self.rules;
        if rules.die_sides < 2 {
            return Err(ConfigError::Invalid(format!(
                "die_sides must be at least 2, got {}",
                rules.die_sides
            )));
        }
        if rules.regulation_innings == 0 {
            return Err(ConfigError::Invalid("regulation_innings must be positive".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config was not valid JSON for this shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config parsed but holds unusable values.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.rules.regulation_innings, 9);
        assert_eq!(config.rules.late_game_inning, 7);
        assert_eq!(config.rules.starter_min_innings, 4);
        assert_eq!(config.rules.die_sides, 20);
        assert!(config.rules.double_plays);
        assert_eq!(config.event_buffer, 256);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "rules": { "late_game_inning": 6, "double_plays": false } }"#,
        )
        .unwrap();

        assert_eq!(config.rules.late_game_inning, 6);
        assert!(!config.rules.double_plays);
        assert_eq!(config.rules.regulation_innings, 9);
        assert_eq!(config.event_buffer, 256);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = EngineConfig::from_json_str(r#"{ "rules": { "die_sides": 1 } }"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = EngineConfig::from_json_str("not json");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::from_json_file("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
