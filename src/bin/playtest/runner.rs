// Playtest Runner — drives every seat on a simulated clock
// One run = one seed; N runs per scenario are aggregated in report.rs

use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use ecosystem_engine::sync::paths;
use ecosystem_engine::*;

use crate::report::*;
use crate::scenarios::{Behaviour, Disruption, Scenario};

const STEP_MS: u64 = 1_000;

type Seat = GameSession<MemoryConnection>;

/// Seat plus a stable key that survives churn.
struct Chair {
    key: u64,
    seat: Seat,
    announced: Vec<u64>,
}

struct Table {
    store: Arc<MemoryStore>,
    config: GameConfig,
    catalog: Arc<DilemmaCatalog>,
    seed: u64,
    chairs: Vec<Chair>,
    next_key: u64,
}

impl Table {
    fn seat_new_player(&mut self, now: u64) {
        let key = self.next_key;
        self.next_key += 1;
        let mut seat = GameSession::start(
            self.store.connect(),
            self.config.clone(),
            Arc::clone(&self.catalog),
            self.seed.wrapping_mul(1_000).wrapping_add(key),
            now,
        );
        if let Err(err) = seat.join(now) {
            tracing::warn!(seat = key, error = %err, "seat could not join");
        }
        self.chairs.push(Chair { key, seat, announced: Vec::new() });
    }

    fn last_tallied(&self) -> u64 {
        self.store
            .snapshot("global/lastTalliedRound")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }
}

fn plan_vote(behaviour: Behaviour, position: usize, rng: &mut ChaCha8Rng) -> Option<(u64, OptionLabel)> {
    match behaviour {
        Behaviour::Unanimous(label) => Some((0, label)),
        Behaviour::Split => Some((0, if position % 2 == 0 { OptionLabel::A } else { OptionLabel::B })),
        Behaviour::Random { participation } => {
            if !rng.gen_bool(participation.clamp(0.0, 1.0)) {
                return None;
            }
            let label = if rng.gen_bool(0.5) { OptionLabel::A } else { OptionLabel::B };
            Some((rng.gen_range(0..25_000), label))
        }
    }
}

/// Run a single scenario iteration with a specific seed.
pub fn run_single(
    scenario: &Scenario,
    seed: u64,
    policy: SelectionPolicy,
    players_override: Option<usize>,
) -> PlaytestResult {
    let start = Instant::now();
    let config = GameConfig { selection: policy, ..GameConfig::default() };
    let players = players_override.unwrap_or(scenario.players).clamp(1, config.max_participants);
    let limit = (scenario.rounds + 2) * (config.round_duration_ms + STEP_MS) + 10_000;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut table = Table {
        store: MemoryStore::shared(),
        config,
        catalog: Arc::new(DilemmaCatalog::builtin()),
        seed,
        chairs: Vec::new(),
        next_key: 0,
    };
    let mut now = 0;
    for _ in 0..players {
        table.seat_new_player(now);
    }

    let mut plans: BTreeMap<(u64, u64), Option<(u64, OptionLabel)>> = BTreeMap::new();
    let mut votes_submitted = 0u32;
    let mut votes_rejected = 0u32;
    let mut tally_events = 0u32;
    let mut outage_started = false;
    let mut outage_ended = false;
    let mut last_churn = 0u64;

    while now <= limit {
        // ─── Disruptions ────────────────────────────────────────────────
        match scenario.disruption {
            Disruption::None => {}
            Disruption::Outage { seat, from_ms, to_ms } => {
                if let Some(chair) = table.chairs.get(seat) {
                    if now >= from_ms && !outage_started {
                        chair.seat.store().go_offline();
                        outage_started = true;
                    }
                    if now >= to_ms && !outage_ended {
                        chair.seat.store().go_online();
                        outage_ended = true;
                    }
                }
            }
            Disruption::Churn { every_rounds } => {
                let tallied = table.last_tallied();
                if every_rounds > 0 && tallied >= last_churn + every_rounds {
                    last_churn = tallied;
                    if let Some(chair) = table.chairs.pop() {
                        drop(chair.seat.teardown(now));
                    }
                    table.seat_new_player(now);
                }
            }
        }

        for chair in &mut table.chairs {
            chair.seat.tick(now);
        }

        // ─── Voting ─────────────────────────────────────────────────────
        for (position, chair) in table.chairs.iter_mut().enumerate() {
            let Some(round) = chair.seat.current_round() else { continue };
            if !round.accepts_at(now) || round.has_choice_from(&chair.seat.me().id) {
                continue;
            }
            let (sequence, started_at) = (round.sequence, round.started_at);
            let plan = plans
                .entry((sequence, chair.key))
                .or_insert_with(|| plan_vote(scenario.behaviour, position, &mut rng));
            let Some((delay, label)) = *plan else { continue };
            if now < started_at + delay {
                continue;
            }
            // one attempt per round and seat
            *plan = None;
            match chair.seat.submit_choice(label, now) {
                Ok(_) => votes_submitted += 1,
                Err(_) => votes_rejected += 1,
            }
        }

        // ─── Events ─────────────────────────────────────────────────────
        for chair in &mut table.chairs {
            for event in chair.seat.drain_events() {
                match event {
                    SessionEvent::RoundStarted { sequence, .. } => chair.announced.push(sequence),
                    SessionEvent::RoundTallied { .. } => tally_events += 1,
                    _ => {}
                }
            }
        }

        if table.last_tallied() >= scenario.rounds {
            break;
        }
        now += STEP_MS;
    }

    // ─── Verdict ────────────────────────────────────────────────────────
    let rounds_tallied = table.last_tallied();
    let mut recorded: Vec<u64> = table
        .store
        .snapshot(paths::ROUNDS)
        .and_then(|v| v.as_object().map(|m| m.keys().filter_map(|k| k.parse().ok()).collect()))
        .unwrap_or_default();
    recorded.sort_unstable();
    let contiguous_rounds =
        recorded.len() as u64 == rounds_tallied && recorded.iter().copied().eq(1..=rounds_tallied);
    let single_announcement =
        table.chairs.iter().all(|c| c.announced.windows(2).all(|w| w[0] < w[1]));

    let final_state = table
        .store
        .snapshot(paths::GLOBAL)
        .and_then(|v| serde_json::from_value::<GlobalRecord>(v).ok())
        .map(|g| g.state)
        .unwrap_or_default();
    let final_health = health_with(&final_state, &table.config.weights);
    let final_status = HealthStatus::from_health(final_health);
    let final_health = final_health.to_f64().unwrap_or(0.0);

    let criteria = &scenario.criteria;
    let mut failures = Vec::new();
    if criteria.require_contiguous_rounds && !contiguous_rounds {
        failures.push(format!("round records {recorded:?} do not match {rounds_tallied} tallies"));
    }
    if criteria.require_single_announcement && !single_announcement {
        failures.push("a seat saw the same round start twice".to_string());
    }
    if rounds_tallied < criteria.min_rounds {
        failures.push(format!("only {rounds_tallied} of {} rounds tallied", criteria.min_rounds));
    }
    if let Some(min) = criteria.min_final_health {
        if final_health + 1e-9 < min {
            failures.push(format!("final health {final_health:.2} below {min:.2}"));
        }
    }

    PlaytestResult {
        scenario: scenario.name.to_string(),
        label: scenario.label.to_string(),
        category: scenario.category.to_string(),
        seed,
        pass: failures.is_empty(),
        players,
        rounds_tallied,
        contiguous_rounds,
        single_announcement,
        votes_submitted,
        votes_rejected,
        tally_events,
        final_health,
        final_status: final_status.label().to_string(),
        final_state,
        simulated_ms: now,
        elapsed_ms: start.elapsed().as_millis(),
        failures,
    }
}

/// Run `runs` seeds of one scenario and aggregate.
pub fn run_scenario(
    scenario: &Scenario,
    runs: usize,
    base_seed: u64,
    policy: SelectionPolicy,
    players_override: Option<usize>,
) -> ScenarioReport {
    let results: Vec<PlaytestResult> = (0..runs.max(1) as u64)
        .map(|i| run_single(scenario, base_seed.wrapping_add(i), policy, players_override))
        .collect();
    ScenarioReport::from_runs(scenario.name, scenario.label, scenario.category, results)
}
