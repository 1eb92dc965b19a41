// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - View Model
//
// Serializable snapshots for the presentation layer. Nothing here touches
// the store; a view is rebuilt from a session whenever the host redraws.

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use crate::aggregation::counted_choices;
use crate::catalog::{category_info, CategoryInfo};
use crate::ecosystem::{health_percent, health_with, value_color, HealthStatus, HealthWeights, MetricBounds};
use crate::error::GameError;
use crate::round::RoundPhase;
use crate::session::GameSession;
use crate::sync::ExternalSync;
use crate::types::{
    Dilemma, DilemmaOption, EcosystemState, Metric, MetricDelta, OptionLabel, Participant, PlayerStats,
    RoundSummary,
};

// ─── Views ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub connected: bool,
    pub joined: bool,
    pub me: PlayerView,
    pub stats: StatsView,
    pub ecosystem: EcosystemView,
    pub round: Option<RoundView>,
    pub players: Vec<PlayerView>,
    pub player_count_label: String,
    pub progress: ChoiceProgress,
    pub last_tally: Option<RoundSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EcosystemView {
    /// Unrounded health, for the fill width.
    pub health: f64,
    pub health_percent: u8,
    pub status: &'static str,
    pub color: &'static str,
    pub icon: &'static str,
    pub metrics: Vec<MetricBar>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricBar {
    pub key: &'static str,
    pub icon: &'static str,
    pub value: i64,
    pub color: &'static str,
    pub fill_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub sequence: u64,
    pub phase: RoundPhase,
    /// Absent when the round points outside the catalog.
    pub dilemma: Option<DilemmaCard>,
    pub seconds_left: u64,
    pub timer_fraction: f64,
    pub urgent: bool,
    pub my_choice: Option<OptionLabel>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DilemmaCard {
    pub id: u32,
    pub text: String,
    pub category: CategoryInfo,
    pub options: Vec<OptionCard>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionCard {
    pub label: OptionLabel,
    pub text: String,
    pub impacts: Vec<ImpactTag>,
    pub consequences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactTag {
    pub icon: &'static str,
    pub value: i64,
    pub text: String,
    pub color: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: String,
    pub short_id: String,
    pub name: String,
    pub initial: String,
    pub color: String,
    pub is_me: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsView {
    pub rounds_played: u32,
    pub total_impact: MetricDelta,
    /// Sum of every metric in `total_impact`.
    pub eco_impact: i64,
    pub last_choice: Option<OptionLabel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChoiceProgress {
    pub submitted: usize,
    pub total: usize,
    pub percent: f64,
}

// ─── Builders ────────────────────────────────────────────────────────────────

impl GameView {
    pub fn build<S: ExternalSync>(session: &GameSession<S>, now: u64) -> Self {
        let config = session.config();
        let me = session.me();
        let players: Vec<PlayerView> =
            session.presence().participants().into_iter().map(|p| player_view(p, &me.id)).collect();

        let round = session.current_round().filter(|r| r.active).map(|r| {
            let dilemma = match session.rounds().current_dilemma() {
                Ok(d) => d.map(dilemma_card),
                Err(_) => None,
            };
            let remaining = r.remaining_ms(now);
            let seconds_left = remaining.div_ceil(1000);
            RoundView {
                sequence: r.sequence,
                phase: session.phase(),
                dilemma,
                seconds_left,
                timer_fraction: fraction(remaining, config.round_duration_ms),
                urgent: seconds_left <= config.urgent_seconds,
                my_choice: session.my_choice(),
            }
        });

        let submitted = session.current_round().map_or(0, |r| counted_choices(&r.choices).count());
        let total = players.len();

        Self {
            connected: session.is_connected(),
            joined: session.is_joined(),
            me: player_view(me, &me.id),
            stats: stats_view(session.stats()),
            ecosystem: ecosystem_view(session.ecosystem(), &config.bounds, &config.weights),
            round,
            player_count_label: player_count_label(total),
            players,
            progress: ChoiceProgress {
                submitted,
                total,
                percent: fraction(submitted as u64, total as u64) * 100.0,
            },
            last_tally: session.last_tally().cloned(),
        }
    }
}

pub fn ecosystem_view(state: &EcosystemState, bounds: &MetricBounds, weights: &HealthWeights) -> EcosystemView {
    let health = health_with(state, weights);
    let status = HealthStatus::from_health(health);
    EcosystemView {
        health: health.to_f64().unwrap_or(0.0),
        health_percent: health_percent(health),
        status: status.label(),
        color: status.color(),
        icon: status.icon(),
        metrics: Metric::ALL
            .iter()
            .map(|&metric| {
                let value = state.get(metric);
                MetricBar {
                    key: metric.key(),
                    icon: metric.icon(),
                    value,
                    color: value_color(value),
                    fill_percent: bounds.fill_percent(value),
                }
            })
            .collect(),
    }
}

pub fn dilemma_card(dilemma: &Dilemma) -> DilemmaCard {
    DilemmaCard {
        id: dilemma.id,
        text: dilemma.text.clone(),
        category: category_info(&dilemma.category),
        options: [OptionLabel::A, OptionLabel::B]
            .into_iter()
            .map(|label| option_card(label, dilemma.option(label)))
            .collect(),
    }
}

fn option_card(label: OptionLabel, option: &DilemmaOption) -> OptionCard {
    OptionCard {
        label,
        text: option.text.clone(),
        impacts: impact_tags(&option.impact),
        consequences: option.consequences.clone(),
    }
}

pub fn impact_tags(impact: &MetricDelta) -> Vec<ImpactTag> {
    impact
        .iter()
        .map(|(metric, value)| ImpactTag {
            icon: metric.icon(),
            value,
            text: if value > 0 { format!("+{value}") } else { value.to_string() },
            color: match value {
                v if v > 0 => "#4CAF50",
                v if v < 0 => "#F44336",
                _ => "#9E9E9E",
            },
        })
        .collect()
}

fn player_view(participant: &Participant, my_id: &str) -> PlayerView {
    let short: String = participant.id.chars().take(8).collect();
    PlayerView {
        id: participant.id.clone(),
        short_id: format!("{short}..."),
        name: participant.name.clone(),
        initial: participant.initial().to_string(),
        color: participant.color.clone(),
        is_me: participant.id == my_id,
    }
}

fn stats_view(stats: &PlayerStats) -> StatsView {
    StatsView {
        rounds_played: stats.choices_made,
        total_impact: stats.total_impact.clone(),
        eco_impact: stats.total_impact.total(),
        last_choice: stats.last_choice.as_ref().map(|c| c.choice),
    }
}

pub fn player_count_label(count: usize) -> String {
    if count == 1 {
        "1 Player".to_string()
    } else {
        format!("{count} Players")
    }
}

fn fraction(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64).clamp(0.0, 1.0)
    }
}

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    AlreadySubmitted,
    RoundClosed,
    NoActiveRound,
    NotJoined,
    InvalidOption,
    Other,
}

impl RejectReason {
    pub fn from_error(err: &GameError) -> Self {
        match err {
            GameError::AlreadySubmitted => Self::AlreadySubmitted,
            GameError::RoundClosed => Self::RoundClosed,
            GameError::NoActiveRound => Self::NoActiveRound,
            GameError::NotJoined => Self::NotJoined,
            GameError::InvalidOption(_) => Self::InvalidOption,
            _ => Self::Other,
        }
    }
}

/// Something the player should be told about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Joined { name: String },
    #[serde(rename_all = "camelCase")]
    RoundStarted { sequence: u64, dilemma_id: u32 },
    ChoiceAccepted { choice: OptionLabel },
    ChoiceRejected { reason: RejectReason, message: String },
    RoundTallied { summary: RoundSummary },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub icon: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundCue {
    pub frequency_hz: f64,
    pub duration_s: f64,
}

impl SoundCue {
    pub const CHOICE: Self = Self { frequency_hz: 523.25, duration_s: 0.2 };
    pub const ROUND_START: Self = Self { frequency_hz: 659.25, duration_s: 0.3 };
    pub const POSITIVE: Self = Self { frequency_hz: 392.0, duration_s: 0.2 };
    pub const NEGATIVE: Self = Self { frequency_hz: 311.13, duration_s: 0.2 };
}

fn notification(title: &str, message: impl Into<String>, icon: &'static str) -> Notification {
    Notification { title: title.to_string(), message: message.into(), icon }
}

impl SessionEvent {
    pub fn notification(&self) -> Notification {
        match self {
            Self::Connected => notification("Connected", "Connected to game server.", "🌍"),
            Self::Disconnected => notification("Sync Error", "Reconnecting...", "🔄"),
            Self::Joined { name } => notification("Welcome!", format!("You joined as {name}"), "👋"),
            Self::RoundStarted { .. } => notification("New Round Started!", "Make your choice!", "🎯"),
            Self::ChoiceAccepted { .. } => {
                notification("Choice Submitted!", "Waiting for other players...", "⏳")
            }
            Self::ChoiceRejected { reason: RejectReason::AlreadySubmitted, .. } => notification(
                "Already Submitted",
                "You've already made your choice for this round.",
                "⏳",
            ),
            Self::ChoiceRejected { message, .. } => notification("Submission Failed", message.clone(), "⚠️"),
            Self::RoundTallied { summary } => notification(
                "Round Results",
                format!(
                    "{} chose A, {} chose B. Health {}%",
                    summary.votes_a,
                    summary.votes_b,
                    health_percent(summary.health_after)
                ),
                "📊",
            ),
        }
    }

    pub fn sound(&self) -> Option<SoundCue> {
        match self {
            Self::RoundStarted { .. } => Some(SoundCue::ROUND_START),
            Self::ChoiceAccepted { .. } => Some(SoundCue::CHOICE),
            Self::RoundTallied { summary } if summary.health_after >= summary.health_before => {
                Some(SoundCue::POSITIVE)
            }
            Self::RoundTallied { .. } => Some(SoundCue::NEGATIVE),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DilemmaCatalog;

    #[test]
    fn test_default_ecosystem_view() {
        let view =
            ecosystem_view(&EcosystemState::default(), &MetricBounds::default(), &HealthWeights::default());
        assert_eq!(view.health_percent, 56);
        assert_eq!(view.status, "Stable");
        assert!((view.health - 56.15).abs() < 1e-9);

        let eco = &view.metrics[0];
        assert_eq!(eco.key, "eco");
        assert_eq!(eco.value, 10);
        assert_eq!(eco.color, "#FF9800");
        assert!((eco.fill_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_dilemma_card_tags() {
        let catalog = DilemmaCatalog::builtin();
        let card = dilemma_card(catalog.get(0).unwrap());
        assert_eq!(card.category.name, "Privacy");
        assert_eq!(card.options.len(), 2);

        let tags = &card.options[0].impacts;
        let innovation = tags.iter().find(|t| t.icon == "💡").unwrap();
        assert_eq!(innovation.text, "+4");
        assert_eq!(innovation.color, "#4CAF50");
        let pollution = tags.iter().find(|t| t.icon == "☁️").unwrap();
        assert_eq!(pollution.text, "0");
        assert_eq!(pollution.color, "#9E9E9E");
        let transparency = tags.iter().find(|t| t.icon == "🔍").unwrap();
        assert_eq!(transparency.text, "-3");
    }

    #[test]
    fn test_player_count_label() {
        assert_eq!(player_count_label(0), "0 Players");
        assert_eq!(player_count_label(1), "1 Player");
        assert_eq!(player_count_label(3), "3 Players");
    }

    #[test]
    fn test_event_texts_and_sounds() {
        let accepted = SessionEvent::ChoiceAccepted { choice: OptionLabel::A };
        assert_eq!(accepted.notification().title, "Choice Submitted!");
        assert_eq!(accepted.sound(), Some(SoundCue::CHOICE));

        let dup = SessionEvent::ChoiceRejected {
            reason: RejectReason::AlreadySubmitted,
            message: GameError::AlreadySubmitted.to_string(),
        };
        assert_eq!(dup.notification().title, "Already Submitted");
        assert_eq!(dup.sound(), None);

        let joined = SessionEvent::Joined { name: "Ada".into() };
        assert_eq!(joined.notification().message, "You joined as Ada");

        let started = SessionEvent::RoundStarted { sequence: 2, dilemma_id: 3 };
        assert_eq!(started.sound(), Some(SoundCue::ROUND_START));
        let json = serde_json::to_value(&started).unwrap();
        assert_eq!(json["kind"], "roundStarted");
        assert_eq!(json["dilemmaId"], 3);
    }

    #[test]
    fn test_tally_sound_follows_health() {
        let before = EcosystemState::default();
        let mut after = before;
        after.pollution += 4;
        let summary = RoundSummary {
            sequence: 1,
            dilemma_id: 1,
            votes_a: 1,
            votes_b: 0,
            participants: 1,
            delta: MetricDelta::from_pairs(&[(Metric::Pollution, 4)]),
            before,
            after,
            health_before: before.health(),
            health_after: after.health(),
            tallied_at: 0,
        };
        let worse = SessionEvent::RoundTallied { summary: summary.clone() };
        assert_eq!(worse.sound(), Some(SoundCue::NEGATIVE));

        let better = SessionEvent::RoundTallied {
            summary: RoundSummary { after: before, health_after: before.health(), ..summary },
        };
        assert_eq!(better.sound(), Some(SoundCue::POSITIVE));
    }
}
