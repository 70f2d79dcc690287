// Configuration module for reading Ultimate.toml
// This module provides OOP-style configuration management for the engine, the
// turn loop and the sync protocol

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::match_state::{Difficulty, SearchParams};

/// Main configuration structure containing all tunable parameters
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub timing: TimingConfig,
    pub search: SearchConfig,
    pub scores: ScoresConfig,
    pub network: NetworkConfig,
}

/// Timing constants for the turn loop and the link
#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    /// Per-move deadline handed to every move source
    pub move_deadline_ms: u64,
    pub handshake_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

/// Search strength per difficulty
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub easy_depth: u32,
    pub easy_random_move_probability: f64,
    pub medium_depth: u32,
    pub hard_depth: u32,
    pub randomize_ties: bool,
}

/// Evaluation constants
#[derive(Debug, Deserialize, Clone)]
pub struct ScoresConfig {
    // Terminal scores
    pub win_score: i32,
    pub draw_penalty: i32,

    // Positional weights, shared by cells within a region and regions within the board
    pub weight_center: i32,
    pub weight_edge: i32,
    pub weight_corner: i32,

    // Region wins count this many times a single cell of the same tier
    pub region_multiplier: i32,
}

/// Link and protocol constants
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub default_port: u16,
    pub max_frame_bytes: usize,
    pub block_incoming: bool,
}

impl TimingConfig {
    pub fn move_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.move_deadline_ms)
    }

    pub fn handshake_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn connect_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Config {
    /// Loads configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the Ultimate.toml configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::FileRead {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads default configuration from Ultimate.toml in the working directory
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::from_file("Ultimate.toml")
    }

    /// Creates a configuration with hardcoded default values as fallback
    /// This should match the constants defined in Ultimate.toml
    pub fn default_hardcoded() -> Self {
        Config {
            timing: TimingConfig {
                move_deadline_ms: 500,
                handshake_timeout_ms: 3000,
                connect_timeout_ms: 5000,
            },
            search: SearchConfig {
                easy_depth: 2,
                easy_random_move_probability: 0.3,
                medium_depth: 4,
                hard_depth: 7,
                randomize_ties: true,
            },
            scores: ScoresConfig {
                win_score: 1_000_000,
                draw_penalty: 50,
                weight_center: 3,
                weight_edge: 2,
                weight_corner: 1,
                region_multiplier: 10,
            },
            network: NetworkConfig {
                default_port: 7341,
                max_frame_bytes: 64 * 1024,
                block_incoming: true,
            },
        }
    }

    /// Attempts to load from file, falls back to hardcoded defaults on error
    pub fn load_or_default() -> Self {
        Self::load_default().unwrap_or_else(|e| {
            log::warn!("Could not load Ultimate.toml ({}), using hardcoded defaults", e);
            Self::default_hardcoded()
        })
    }

    /// Validates value ranges that the search and the protocol rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.move_deadline_ms == 0 {
            return Err(ConfigError::Validation("timing.move_deadline_ms must be > 0".into()));
        }
        if self.search.easy_depth == 0 || self.search.medium_depth == 0 || self.search.hard_depth == 0 {
            return Err(ConfigError::Validation("search depths must be > 0".into()));
        }
        let p = self.search.easy_random_move_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::Validation(
                "search.easy_random_move_probability must be in [0, 1]".into(),
            ));
        }
        if self.scores.draw_penalty < 0 || self.scores.draw_penalty >= self.scores.win_score / 2 {
            return Err(ConfigError::Validation(
                "scores.draw_penalty must be in [0, win_score / 2)".into(),
            ));
        }
        if self.network.max_frame_bytes < 1024 {
            return Err(ConfigError::Validation("network.max_frame_bytes must be >= 1024".into()));
        }
        Ok(())
    }

    /// Maps a difficulty preset to the search parameters of an AI actor
    pub fn search_params(&self, difficulty: Difficulty) -> SearchParams {
        match difficulty {
            Difficulty::Easy => SearchParams::Casual {
                depth: self.search.easy_depth,
                random_move_probability: self.search.easy_random_move_probability,
            },
            Difficulty::Medium => SearchParams::Negamax { depth: self.search.medium_depth },
            Difficulty::Hard => SearchParams::Negamax { depth: self.search.hard_depth },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_hardcoded();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.move_deadline_ms, 500);
    }

    #[test]
    fn test_ultimate_toml_can_be_parsed() {
        let result = Config::from_file("Ultimate.toml");
        assert!(result.is_ok(), "Failed to parse Ultimate.toml: {:?}", result.err());
    }

    #[test]
    fn test_all_config_values_match_hardcoded_defaults() {
        let file_config = Config::from_file("Ultimate.toml").expect("Ultimate.toml should be parseable");
        let hardcoded_config = Config::default_hardcoded();

        // Timing
        assert_eq!(file_config.timing.move_deadline_ms, hardcoded_config.timing.move_deadline_ms);
        assert_eq!(
            file_config.timing.handshake_timeout_ms,
            hardcoded_config.timing.handshake_timeout_ms
        );

        // Search
        assert_eq!(file_config.search.easy_depth, hardcoded_config.search.easy_depth);
        assert_eq!(file_config.search.medium_depth, hardcoded_config.search.medium_depth);
        assert_eq!(file_config.search.hard_depth, hardcoded_config.search.hard_depth);
        assert_eq!(
            file_config.search.easy_random_move_probability,
            hardcoded_config.search.easy_random_move_probability
        );

        // Scores
        assert_eq!(file_config.scores.win_score, hardcoded_config.scores.win_score);
        assert_eq!(file_config.scores.draw_penalty, hardcoded_config.scores.draw_penalty);
        assert_eq!(file_config.scores.weight_center, hardcoded_config.scores.weight_center);
        assert_eq!(file_config.scores.region_multiplier, hardcoded_config.scores.region_multiplier);

        // Network
        assert_eq!(file_config.network.default_port, hardcoded_config.network.default_port);
        assert_eq!(file_config.network.max_frame_bytes, hardcoded_config.network.max_frame_bytes);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = Config::default_hardcoded();
        config.search.easy_random_move_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default_hardcoded();
        config.scores.draw_penalty = config.scores.win_score;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_returns_error() {
        let result = Config::from_file("nonexistent.toml");
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn test_difficulty_mapping() {
        let config = Config::default_hardcoded();
        assert_eq!(config.search_params(Difficulty::Hard), SearchParams::Negamax { depth: 7 });
        assert!(matches!(
            config.search_params(Difficulty::Easy),
            SearchParams::Casual { depth: 2, .. }
        ));
    }
}
