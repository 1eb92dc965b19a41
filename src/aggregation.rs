// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Choice Aggregation
//
// A round's choices are reduced to one delta: per-metric mean of the counted
// impacts, rounded half away from zero. The delta is applied to the shared
// ecosystem inside a store transaction so concurrent tallies never lose an
// update, and `lastTalliedRound` makes a repeated tally of the same round a
// no-op.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::catalog::DilemmaCatalog;
use crate::config::GameConfig;
use crate::ecosystem::{health_with, HealthWeights, MetricBounds};
use crate::error::GameResult;
use crate::sync::{decode_record, encode_record, paths, ExternalSync, TransactionOutcome};
use crate::types::{
    ChoiceRecord, EcosystemState, GlobalRecord, Metric, MetricDelta, OptionLabel, Round,
    RoundSummary,
};

// ---------------------------------------------------------------------------
// Pure aggregation
// ---------------------------------------------------------------------------

/// Records that count toward the tally: one per participant, and only when
/// the record's own `player_id` matches the key it was stored under.
pub fn counted_choices(
    choices: &BTreeMap<String, ChoiceRecord>,
) -> impl Iterator<Item = &ChoiceRecord> {
    choices.iter().filter(|(key, record)| **key == record.player_id).map(|(_, record)| record)
}

/// `sum / count` rounded half away from zero.
pub fn rounded_mean(sum: i64, count: usize) -> i64 {
    let count = count.max(1);
    (Decimal::from(sum) / Decimal::from(count))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

/// Reduce a round's choices to a single metric delta. With no choices every
/// metric is 0.
pub fn aggregate(choices: &BTreeMap<String, ChoiceRecord>) -> MetricDelta {
    let mut sums = MetricDelta::new();
    let mut count = 0usize;
    for record in counted_choices(choices) {
        sums.accumulate(&record.impact);
        count += 1;
    }

    let mut delta = MetricDelta::new();
    for metric in Metric::ALL {
        delta.set(metric, rounded_mean(sums.get(metric), count));
    }
    delta
}

/// Replace each record's impact with the catalog's impact for the chosen
/// option, so a client cannot vote with a forged impact vector. Records for
/// a dilemma missing from the catalog keep their submitted impact.
pub fn canonicalize(round: &Round, catalog: &DilemmaCatalog) -> BTreeMap<String, ChoiceRecord> {
    let dilemma = match catalog.get(round.dilemma_index) {
        Ok(d) => d,
        Err(err) => {
            warn!(round = round.sequence, error = %err, "tallying with submitted impacts");
            return round.choices.clone();
        }
    };
    round
        .choices
        .iter()
        .map(|(key, record)| {
            let mut record = record.clone();
            record.impact = dilemma.option(record.choice).impact.clone();
            (key.clone(), record)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Applying a tally
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyReport {
    pub summary: RoundSummary,
    /// False when another client already applied this round.
    pub applied: bool,
}

/// The parts of `GameConfig` a tally depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TallyRules {
    pub bounds: MetricBounds,
    /// Used when `/global` is missing or malformed.
    pub initial: EcosystemState,
    pub weights: HealthWeights,
}

impl From<&GameConfig> for TallyRules {
    fn from(config: &GameConfig) -> Self {
        Self { bounds: config.bounds, initial: config.initial_state, weights: config.weights }
    }
}

/// Tally `round` and apply the delta to `/global` atomically.
pub fn tally<S: ExternalSync + ?Sized>(
    store: &S,
    round: &Round,
    catalog: &DilemmaCatalog,
    rules: &TallyRules,
    now: u64,
) -> GameResult<TallyReport> {
    let TallyRules { bounds, initial, weights } = rules;
    let choices = canonicalize(round, catalog);
    let delta = aggregate(&choices);
    let counted: Vec<&ChoiceRecord> = counted_choices(&choices).collect();
    let votes_a = counted.iter().filter(|r| r.choice == OptionLabel::A).count() as u32;
    let votes_b = counted.len() as u32 - votes_a;

    let mut before = *initial;
    let mut after = *initial;
    let mut encode_error = None;
    let result = store.transaction(paths::GLOBAL, &mut |current: Option<&Value>| {
        let record: GlobalRecord = decode_record(paths::GLOBAL, current)
            .unwrap_or_else(|| GlobalRecord { state: *initial, ..Default::default() });
        before = record.state.clamped(bounds);
        if record.last_tallied_round >= round.sequence {
            after = before;
            return TransactionOutcome::Abort;
        }
        after = before.apply(&delta, bounds);
        let next = GlobalRecord { state: after, last_updated: now, last_tallied_round: round.sequence };
        match encode_record(&next) {
            Ok(value) => TransactionOutcome::Commit(value),
            Err(err) => {
                encode_error = Some(err);
                TransactionOutcome::Abort
            }
        }
    })?;
    if let Some(err) = encode_error {
        return Err(err);
    }

    let dilemma_id = catalog
        .get(round.dilemma_index)
        .map(|d| d.id)
        .unwrap_or_else(|_| counted.first().map_or(0, |r| r.dilemma_id));
    let summary = RoundSummary {
        sequence: round.sequence,
        dilemma_id,
        votes_a,
        votes_b,
        participants: counted.len() as u32,
        delta,
        before,
        after,
        health_before: health_with(&before, weights),
        health_after: health_with(&after, weights),
        tallied_at: now,
    };

    if result.committed {
        let record = encode_record(&summary)?;
        store.set(&paths::round_summary(round.sequence), record.clone())?;
        store.set(paths::LAST_TALLY, record)?;
        info!(
            round = round.sequence,
            votes_a,
            votes_b,
            health = %summary.health_after,
            "round tallied"
        );
    } else {
        debug!(round = round.sequence, "round already tallied elsewhere");
    }

    Ok(TallyReport { summary, applied: result.committed })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::MemoryStore;
    use serde_json::json;

    fn choice(player: &str, label: OptionLabel, impact: &[(Metric, i64)]) -> ChoiceRecord {
        ChoiceRecord {
            choice: label,
            impact: MetricDelta::from_pairs(impact),
            player_id: player.to_string(),
            player_name: format!("{player}_name"),
            submitted_at: 1_000,
            dilemma_id: 1,
        }
    }

    fn choices(records: Vec<ChoiceRecord>) -> BTreeMap<String, ChoiceRecord> {
        records.into_iter().map(|r| (r.player_id.clone(), r)).collect()
    }

    #[test]
    fn test_empty_round_is_zero_delta() {
        let delta = aggregate(&BTreeMap::new());
        assert!(delta.is_zero());
        for metric in Metric::ALL {
            assert_eq!(delta.get(metric), 0);
        }

        let state = EcosystemState::default();
        assert_eq!(state.apply(&delta, &MetricBounds::default()), state);
    }

    #[test]
    fn test_mean_of_opposing_votes() {
        let set = choices(vec![
            choice("p1", OptionLabel::A, &[(Metric::Eco, 2)]),
            choice("p2", OptionLabel::B, &[(Metric::Eco, -4)]),
        ]);
        let delta = aggregate(&set);
        assert_eq!(delta.get(Metric::Eco), -1);
        assert_eq!(delta.get(Metric::Pollution), 0);

        let state = EcosystemState::new(0, 5, 10, 8, 6);
        assert_eq!(state.apply(&delta, &MetricBounds::default()).eco, 0);
        let state = EcosystemState::new(4, 5, 10, 8, 6);
        assert_eq!(state.apply(&delta, &MetricBounds::default()).eco, 3);
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(rounded_mean(1, 2), 1);
        assert_eq!(rounded_mean(-1, 2), -1);
        assert_eq!(rounded_mean(3, 2), 2);
        assert_eq!(rounded_mean(-3, 2), -2);
        assert_eq!(rounded_mean(1, 3), 0);
        assert_eq!(rounded_mean(-2, 3), -1);
        assert_eq!(rounded_mean(7, 0), 7);
    }

    #[test]
    fn test_mismatched_key_is_not_counted() {
        let mut set = choices(vec![choice("p1", OptionLabel::A, &[(Metric::Eco, 4)])]);
        // a second vote smuggled in under another key
        set.insert("p2".into(), choice("p1", OptionLabel::A, &[(Metric::Eco, 4)]));
        assert_eq!(counted_choices(&set).count(), 1);
        assert_eq!(aggregate(&set).get(Metric::Eco), 4);
    }

    #[test]
    fn test_canonicalize_uses_catalog_impacts() {
        let catalog = DilemmaCatalog::builtin();
        let mut round = Round::open(1, 0, 0, 30_000);
        round.choices = choices(vec![choice("p1", OptionLabel::B, &[(Metric::Eco, 99)])]);

        let fixed = canonicalize(&round, &catalog);
        assert_eq!(fixed["p1"].impact, catalog.get(0).unwrap().option_b.impact);
    }

    #[test]
    fn test_tally_applies_once_per_round() {
        let store = MemoryStore::shared();
        let conn = store.connect();
        let catalog = DilemmaCatalog::builtin();
        let rules = TallyRules::default();

        let mut round = Round::open(3, 1, 0, 30_000);
        // dilemma 2: A = eco +3, B = eco +1
        round.choices = choices(vec![
            choice("p1", OptionLabel::A, &[]),
            choice("p2", OptionLabel::A, &[]),
            choice("p3", OptionLabel::B, &[]),
        ]);

        let first = tally(&conn, &round, &catalog, &rules, 31_000).unwrap();
        assert!(first.applied);
        assert_eq!(first.summary.votes_a, 2);
        assert_eq!(first.summary.votes_b, 1);
        // eco: (3 + 3 + 1) / 3 = 2.33 -> 2
        assert_eq!(first.summary.delta.get(Metric::Eco), 2);
        assert_eq!(first.summary.after.eco, 12);

        let second = tally(&conn, &round, &catalog, &rules, 31_500).unwrap();
        assert!(!second.applied);

        let global = store.snapshot(paths::GLOBAL).unwrap();
        assert_eq!(global["eco"], json!(12));
        assert_eq!(global["lastTalliedRound"], json!(3));
        assert!(store.snapshot(&paths::round_summary(3)).is_some());
        assert_eq!(store.snapshot(paths::LAST_TALLY).unwrap()["sequence"], json!(3));
    }

    #[test]
    fn test_tally_reads_current_remote_value() {
        let store = MemoryStore::shared();
        let conn = store.connect();
        conn.set(paths::GLOBAL, json!({
            "eco": 1, "pollution": 5, "inclusivity": 10, "transparency": 8, "innovation": 6,
            "lastTalliedRound": 1
        }))
        .unwrap();

        let mut round = Round::open(2, 0, 0, 30_000);
        round.choices = choices(vec![choice("p1", OptionLabel::A, &[])]);
        let report =
            tally(&conn, &round, &DilemmaCatalog::builtin(), &TallyRules::default(), 40_000).unwrap();

        // dilemma 1 option A: eco -1, transparency -3, innovation +4
        assert_eq!(report.summary.before.eco, 1);
        assert_eq!(report.summary.after.eco, 0);
        assert_eq!(report.summary.after.transparency, 5);
        assert_eq!(report.summary.after.innovation, 10);
    }

    #[test]
    fn test_summary_health_uses_configured_weights() {
        let store = MemoryStore::shared();
        let conn = store.connect();
        let weights = HealthWeights {
            eco: Decimal::ONE,
            pollution: Decimal::ZERO,
            inclusivity: Decimal::ZERO,
            transparency: Decimal::ZERO,
            innovation: Decimal::ZERO,
        };
        let rules = TallyRules { weights, ..TallyRules::default() };

        let mut round = Round::open(1, 1, 0, 30_000);
        round.choices = choices(vec![choice("p1", OptionLabel::A, &[])]);
        let report = tally(&conn, &round, &DilemmaCatalog::builtin(), &rules, 31_000).unwrap();

        // dilemma 2 option A: eco +3, so 10 -> 13 under an eco-only weighting
        assert_eq!(report.summary.health_before, Decimal::from(60));
        assert_eq!(report.summary.health_after, Decimal::from(63));
    }
}
