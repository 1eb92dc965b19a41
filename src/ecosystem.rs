// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Ecosystem Health
//
// Health is a weighted sum of the five metrics offset by 50 and clamped to
// [0, 100]. It is computed in Decimal so the strict status thresholds are
// compared exactly (75.0 is Stable, 75.01 is Thriving).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{EcosystemState, Metric, MetricDelta};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const HEALTH_OFFSET: Decimal = dec!(50);
pub const HEALTH_MIN: Decimal = dec!(0);
pub const HEALTH_MAX: Decimal = dec!(100);

// ---------------------------------------------------------------------------
// HealthWeights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub eco: Decimal,
    pub pollution: Decimal,
    pub inclusivity: Decimal,
    pub transparency: Decimal,
    pub innovation: Decimal,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            eco: dec!(0.3),
            pollution: dec!(-0.25),
            inclusivity: dec!(0.2),
            transparency: dec!(0.15),
            innovation: dec!(0.2),
        }
    }
}

impl HealthWeights {
    pub fn weight(&self, metric: Metric) -> Decimal {
        match metric {
            Metric::Eco => self.eco,
            Metric::Pollution => self.pollution,
            Metric::Inclusivity => self.inclusivity,
            Metric::Transparency => self.transparency,
            Metric::Innovation => self.innovation,
        }
    }
}

// ---------------------------------------------------------------------------
// MetricBounds
// ---------------------------------------------------------------------------

/// Clamp range for every metric. `max: None` leaves metrics unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricBounds {
    pub min: i64,
    pub max: Option<i64>,
}

impl Default for MetricBounds {
    fn default() -> Self {
        Self { min: 0, max: Some(20) }
    }
}

impl MetricBounds {
    pub fn unbounded_above() -> Self {
        Self { min: 0, max: None }
    }

    pub fn clamp(&self, value: i64) -> i64 {
        let floored = value.max(self.min);
        match self.max {
            Some(max) => floored.min(max),
            None => floored,
        }
    }

    /// Fraction of the bar to fill for a metric value. Unbounded metrics use
    /// the default ceiling of 20 for display.
    pub fn fill_percent(&self, value: i64) -> f64 {
        let max = self.max.unwrap_or(20).max(1) as f64;
        ((value as f64 / max) * 100.0).clamp(0.0, 100.0)
    }
}

// ---------------------------------------------------------------------------
// HealthStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Thriving,
    Stable,
    Stressed,
    Critical,
}

impl HealthStatus {
    /// Strict `>` at every threshold: a health of exactly 75 is Stable.
    pub fn from_health(health: Decimal) -> Self {
        if health > dec!(75) {
            Self::Thriving
        } else if health > dec!(50) {
            Self::Stable
        } else if health > dec!(25) {
            Self::Stressed
        } else {
            Self::Critical
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Thriving => "Thriving",
            Self::Stable => "Stable",
            Self::Stressed => "Stressed",
            Self::Critical => "Critical",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Thriving => "#4CAF50",
            Self::Stable => "#FF9800",
            Self::Stressed => "#FF5722",
            Self::Critical => "#F44336",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Thriving => "🌿",
            Self::Stable => "⚖️",
            Self::Stressed => "⚠️",
            Self::Critical => "🚨",
        }
    }
}

// ---------------------------------------------------------------------------
// Health computation
// ---------------------------------------------------------------------------

/// `clamp(sum(metric * weight) + 50, 0, 100)`.
pub fn health_with(state: &EcosystemState, weights: &HealthWeights) -> Decimal {
    let weighted: Decimal = Metric::ALL
        .iter()
        .map(|m| Decimal::from(state.get(*m)) * weights.weight(*m))
        .sum();
    (weighted + HEALTH_OFFSET).clamp(HEALTH_MIN, HEALTH_MAX)
}

/// Health rounded for display (half away from zero, which equals half-up on
/// the non-negative health range).
pub fn health_percent(health: Decimal) -> u8 {
    health
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u8()
        .unwrap_or(0)
}

impl EcosystemState {
    pub fn health(&self) -> Decimal {
        health_with(self, &HealthWeights::default())
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_health(self.health())
    }

    /// Apply a delta and clamp every metric into `bounds`.
    pub fn apply(&self, delta: &MetricDelta, bounds: &MetricBounds) -> Self {
        let mut next = *self;
        for metric in Metric::ALL {
            next.set(metric, bounds.clamp(self.get(metric).saturating_add(delta.get(metric))));
        }
        next
    }

    /// Bring a decoded remote state back into bounds.
    pub fn clamped(&self, bounds: &MetricBounds) -> Self {
        self.apply(&MetricDelta::new(), bounds)
    }
}

/// Colour used for a single metric value readout.
pub fn value_color(value: i64) -> &'static str {
    if value >= 15 {
        "#4CAF50"
    } else if value >= 10 {
        "#FF9800"
    } else if value >= 5 {
        "#FF5722"
    } else {
        "#F44336"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_ecosystem_is_stable() {
        let state = EcosystemState::default();
        // 3 - 1.25 + 2 + 1.2 + 1.2 + 50
        assert_eq!(state.health(), dec!(56.15));
        assert_eq!(health_percent(state.health()), 56);
        assert_eq!(state.status(), HealthStatus::Stable);
    }

    #[test]
    fn test_status_thresholds_are_strict() {
        assert_eq!(HealthStatus::from_health(dec!(75.0)), HealthStatus::Stable);
        assert_eq!(HealthStatus::from_health(dec!(75.01)), HealthStatus::Thriving);
        assert_eq!(HealthStatus::from_health(dec!(50.0)), HealthStatus::Stressed);
        assert_eq!(HealthStatus::from_health(dec!(50.01)), HealthStatus::Stable);
        assert_eq!(HealthStatus::from_health(dec!(25.0)), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_health(dec!(25.01)), HealthStatus::Stressed);
        assert_eq!(HealthStatus::from_health(dec!(0)), HealthStatus::Critical);
    }

    #[test]
    fn test_exact_threshold_from_metrics() {
        // 0.3 * 50 + 0.2 * 50 = 25, + 50 offset = 75 exactly
        let state = EcosystemState::new(50, 0, 50, 0, 0);
        assert_eq!(state.health(), dec!(75));
        assert_eq!(state.status(), HealthStatus::Stable);
    }

    #[test]
    fn test_health_is_clamped() {
        let worst = EcosystemState::new(0, 1_000, 0, 0, 0);
        assert_eq!(worst.health(), dec!(0));
        assert_eq!(worst.status(), HealthStatus::Critical);

        let best = EcosystemState::new(1_000, 0, 1_000, 1_000, 1_000);
        assert_eq!(best.health(), dec!(100));
        assert_eq!(best.status(), HealthStatus::Thriving);
    }

    #[test]
    fn test_health_within_range_over_grid() {
        for eco in [0, 7, 20] {
            for pollution in [0, 13, 20] {
                for rest in [0, 9, 20] {
                    let state = EcosystemState::new(eco, pollution, rest, rest, rest);
                    let h = state.health();
                    assert!(h >= HEALTH_MIN && h <= HEALTH_MAX);
                    assert_eq!(h, state.health());
                }
            }
        }
    }

    #[test]
    fn test_apply_clamps_to_bounds() {
        let state = EcosystemState::new(1, 19, 10, 10, 10);
        let delta = MetricDelta::from_pairs(&[(Metric::Eco, -3), (Metric::Pollution, 4)]);

        let bounded = state.apply(&delta, &MetricBounds::default());
        assert_eq!(bounded.eco, 0);
        assert_eq!(bounded.pollution, 20);

        let open = state.apply(&delta, &MetricBounds::unbounded_above());
        assert_eq!(open.eco, 0);
        assert_eq!(open.pollution, 23);
        assert_eq!(open.inclusivity, 10);
    }

    #[test]
    fn test_value_color_buckets() {
        assert_eq!(value_color(15), "#4CAF50");
        assert_eq!(value_color(10), "#FF9800");
        assert_eq!(value_color(5), "#FF5722");
        assert_eq!(value_color(4), "#F44336");
    }
}
