// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Type Definitions

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::GameError;

// ─── Metric ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Eco,
    Pollution,
    Inclusivity,
    Transparency,
    Innovation,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Eco,
        Metric::Pollution,
        Metric::Inclusivity,
        Metric::Transparency,
        Metric::Innovation,
    ];

    /// Field name used in store records.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Eco => "eco",
            Self::Pollution => "pollution",
            Self::Inclusivity => "inclusivity",
            Self::Transparency => "transparency",
            Self::Innovation => "innovation",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Self::Eco => "🌱",
            Self::Pollution => "☁️",
            Self::Inclusivity => "🤝",
            Self::Transparency => "🔍",
            Self::Innovation => "💡",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.key() == key)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ─── MetricDelta ─────────────────────────────────────────────────────────────

/// Partial mapping from metric to a signed change. Missing metrics read as 0.
///
/// Decoding goes through a plain string map so that unknown metric names in
/// remote records are dropped instead of failing the whole record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, i64>", into = "BTreeMap<String, i64>")]
pub struct MetricDelta(BTreeMap<Metric, i64>);

impl MetricDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[(Metric, i64)]) -> Self {
        let mut delta = Self::new();
        for &(metric, value) in pairs {
            delta.set(metric, value);
        }
        delta
    }

    pub fn get(&self, metric: Metric) -> i64 {
        self.0.get(&metric).copied().unwrap_or(0)
    }

    pub fn set(&mut self, metric: Metric, value: i64) {
        self.0.insert(metric, value);
    }

    /// Entries that are explicitly present, in metric order.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, i64)> + '_ {
        self.0.iter().map(|(m, v)| (*m, *v))
    }

    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| *v == 0)
    }

    pub fn accumulate(&mut self, other: &MetricDelta) {
        for (metric, value) in other.iter() {
            *self.0.entry(metric).or_insert(0) += value;
        }
    }

    /// Sum over all metrics, as shown in the player's "eco impact" counter.
    pub fn total(&self) -> i64 {
        self.0.values().sum()
    }
}

impl From<BTreeMap<String, i64>> for MetricDelta {
    fn from(raw: BTreeMap<String, i64>) -> Self {
        let mut delta = Self::new();
        for (key, value) in raw {
            if let Some(metric) = Metric::from_key(&key) {
                delta.set(metric, value);
            }
        }
        delta
    }
}

impl From<MetricDelta> for BTreeMap<String, i64> {
    fn from(delta: MetricDelta) -> Self {
        delta.0.into_iter().map(|(m, v)| (m.key().to_string(), v)).collect()
    }
}

// ─── EcosystemState ──────────────────────────────────────────────────────────

/// The five shared metrics. Health and status are derived, see `ecosystem`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EcosystemState {
    pub eco: i64,
    pub pollution: i64,
    pub inclusivity: i64,
    pub transparency: i64,
    pub innovation: i64,
}

impl Default for EcosystemState {
    fn default() -> Self {
        Self { eco: 10, pollution: 5, inclusivity: 10, transparency: 8, innovation: 6 }
    }
}

impl EcosystemState {
    pub fn new(eco: i64, pollution: i64, inclusivity: i64, transparency: i64, innovation: i64) -> Self {
        Self { eco, pollution, inclusivity, transparency, innovation }
    }

    pub fn get(&self, metric: Metric) -> i64 {
        match metric {
            Metric::Eco => self.eco,
            Metric::Pollution => self.pollution,
            Metric::Inclusivity => self.inclusivity,
            Metric::Transparency => self.transparency,
            Metric::Innovation => self.innovation,
        }
    }

    pub fn set(&mut self, metric: Metric, value: i64) {
        match metric {
            Metric::Eco => self.eco = value,
            Metric::Pollution => self.pollution = value,
            Metric::Inclusivity => self.inclusivity = value,
            Metric::Transparency => self.transparency = value,
            Metric::Innovation => self.innovation = value,
        }
    }
}

/// Wire record stored at `/global`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalRecord {
    #[serde(flatten)]
    pub state: EcosystemState,
    #[serde(default)]
    pub last_updated: u64,
    /// Sequence of the last round whose tally was applied.
    #[serde(default)]
    pub last_tallied_round: u64,
}

// ─── Dilemmas ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OptionLabel {
    A,
    B,
}

impl OptionLabel {
    pub fn other(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl fmt::Display for OptionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::B => f.write_str("B"),
        }
    }
}

impl FromStr for OptionLabel {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Self::A),
            "B" | "b" => Ok(Self::B),
            other => Err(GameError::InvalidOption(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DilemmaOption {
    pub text: String,
    pub impact: MetricDelta,
    pub consequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dilemma {
    pub id: u32,
    pub text: String,
    pub category: String,
    pub option_a: DilemmaOption,
    pub option_b: DilemmaOption,
}

impl Dilemma {
    pub fn option(&self, label: OptionLabel) -> &DilemmaOption {
        match label {
            OptionLabel::A => &self.option_a,
            OptionLabel::B => &self.option_b,
        }
    }
}

// ─── Participant ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub color: String,
    pub joined_at: u64,
    pub last_active: u64,
}

impl Participant {
    /// First letter of the display name, drawn inside the avatar.
    pub fn initial(&self) -> char {
        self.name.chars().next().unwrap_or('?')
    }
}

// ─── Rounds ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceRecord {
    pub choice: OptionLabel,
    #[serde(default)]
    pub impact: MetricDelta,
    pub player_id: String,
    #[serde(default)]
    pub player_name: String,
    #[serde(default)]
    pub submitted_at: u64,
    #[serde(default)]
    pub dilemma_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    #[serde(default)]
    pub sequence: u64,
    pub dilemma_index: usize,
    pub started_at: u64,
    pub ends_at: u64,
    #[serde(default)]
    pub active: bool,
    /// Keyed by participant id. Hosted stores drop empty maps, hence the default.
    #[serde(default, deserialize_with = "choices_skipping_malformed")]
    pub choices: BTreeMap<String, ChoiceRecord>,
}

/// Decode choices one entry at a time. A malformed vote is dropped on its
/// own and never takes the rest of the round down with it.
fn choices_skipping_malformed<'de, D>(deserializer: D) -> Result<BTreeMap<String, ChoiceRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(entries) = Value::deserialize(deserializer)? else {
        tracing::warn!("round choices are not an object, ignoring them");
        return Ok(BTreeMap::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<ChoiceRecord>(value) {
            Ok(record) => Some((key, record)),
            Err(err) => {
                tracing::warn!(participant = %key, error = %err, "skipping malformed choice");
                None
            }
        })
        .collect())
}

impl Round {
    pub fn open(sequence: u64, dilemma_index: usize, now: u64, duration_ms: u64) -> Self {
        Self {
            sequence,
            dilemma_index,
            started_at: now,
            ends_at: now.saturating_add(duration_ms),
            active: true,
            choices: BTreeMap::new(),
        }
    }

    /// Submissions are accepted on the closed interval `[started_at, ends_at]`.
    pub fn accepts_at(&self, now: u64) -> bool {
        self.active && now >= self.started_at && now <= self.ends_at
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.ends_at
    }

    /// True when no new round may replace this one yet.
    pub fn is_running(&self, now: u64) -> bool {
        self.active && !self.is_expired(now)
    }

    pub fn remaining_ms(&self, now: u64) -> u64 {
        self.ends_at.saturating_sub(now)
    }

    pub fn has_choice_from(&self, participant_id: &str) -> bool {
        self.choices.contains_key(participant_id)
    }
}

/// History entry written to `/rounds/{sequence}` once a round is tallied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub sequence: u64,
    pub dilemma_id: u32,
    pub votes_a: u32,
    pub votes_b: u32,
    pub participants: u32,
    pub delta: MetricDelta,
    pub before: EcosystemState,
    pub after: EcosystemState,
    /// Health of `before` and `after` under the game's configured weights.
    #[serde(default)]
    pub health_before: Decimal,
    #[serde(default)]
    pub health_after: Decimal,
    pub tallied_at: u64,
}

// ─── PlayerStats ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastChoice {
    pub choice: OptionLabel,
    pub impact: MetricDelta,
    pub time: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub choices_made: u32,
    pub total_impact: MetricDelta,
    pub last_choice: Option<LastChoice>,
}

impl PlayerStats {
    pub fn record(&mut self, record: &ChoiceRecord) {
        self.choices_made += 1;
        self.total_impact.accumulate(&record.impact);
        self.last_choice = Some(LastChoice {
            choice: record.choice,
            impact: record.impact.clone(),
            time: record.submitted_at,
        });
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
