// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Game Configuration

use serde::{Deserialize, Serialize};

use crate::catalog::SelectionPolicy;
use crate::ecosystem::{HealthWeights, MetricBounds};
use crate::error::GameResult;
use crate::types::EcosystemState;

/// Default avatar palette.
pub const COLOR_PALETTE: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#FFD166", "#06D6A0", "#118AB2",
    "#EF476F", "#7B2CBF", "#3A86FF", "#FB5607", "#8338EC",
];

/// Tunable game constants. Every field has a default, so a partial JSON
/// document only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameConfig {
    /// Length of the choice window.
    pub round_duration_ms: u64,
    /// Rounds are only opened once this many participants are present.
    pub min_participants: usize,
    pub max_participants: usize,
    pub bounds: MetricBounds,
    pub selection: SelectionPolicy,
    /// How often a joined participant refreshes `lastActive`.
    pub heartbeat_interval_ms: u64,
    /// Seconds left at which the countdown turns urgent.
    pub urgent_seconds: u64,
    pub initial_state: EcosystemState,
    pub weights: HealthWeights,
    pub palette: Vec<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_duration_ms: 30_000,
            min_participants: 2,
            max_participants: 20,
            bounds: MetricBounds::default(),
            selection: SelectionPolicy::Sequential,
            heartbeat_interval_ms: 5_000,
            urgent_seconds: 10,
            initial_state: EcosystemState::default(),
            weights: HealthWeights::default(),
            palette: COLOR_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl GameConfig {
    pub fn from_json(json: &str) -> GameResult<Self> {
        let mut config: GameConfig = serde_json::from_str(json)?;
        config.normalize();
        Ok(config)
    }

    /// Config for a single local player (no participant gate).
    pub fn solo() -> Self {
        Self { min_participants: 1, ..Self::default() }
    }

    /// Repair values that would stall the game.
    fn normalize(&mut self) {
        if self.min_participants == 0 {
            self.min_participants = 1;
        }
        if self.max_participants < self.min_participants {
            self.max_participants = self.min_participants;
        }
        if self.round_duration_ms == 0 {
            self.round_duration_ms = Self::default().round_duration_ms;
        }
        if self.palette.is_empty() {
            self.palette = Self::default().palette;
        }
        self.initial_state = self.initial_state.clamped(&self.bounds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_game_constants() {
        let config = GameConfig::default();
        assert_eq!(config.round_duration_ms, 30_000);
        assert_eq!(config.min_participants, 2);
        assert_eq!(config.max_participants, 20);
        assert_eq!(config.bounds.max, Some(20));
        assert_eq!(config.palette.len(), 10);
    }

    #[test]
    fn test_partial_json_overrides() {
        let config =
            GameConfig::from_json(r#"{ "roundDurationMs": 20000, "selection": "random" }"#).unwrap();
        assert_eq!(config.round_duration_ms, 20_000);
        assert_eq!(config.selection, SelectionPolicy::Random);
        assert_eq!(config.min_participants, 2);
    }

    #[test]
    fn test_normalize_repairs_degenerate_values() {
        let config = GameConfig::from_json(
            r#"{ "minParticipants": 0, "maxParticipants": 0, "roundDurationMs": 0, "palette": [] }"#,
        )
        .unwrap();
        assert_eq!(config.min_participants, 1);
        assert_eq!(config.max_participants, 1);
        assert_eq!(config.round_duration_ms, 30_000);
        assert!(!config.palette.is_empty());
    }

    #[test]
    fn test_unbounded_policy_from_json() {
        let config = GameConfig::from_json(r#"{ "bounds": { "min": 0, "max": null } }"#).unwrap();
        assert_eq!(config.bounds.max, None);
    }
}
