// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Round Controller
//
// Round lifecycle: Idle -> Open -> Tallying -> Idle(next).
//
// Every client runs its own controller against the shared store, so any of
// them may notice an expired round. Replacing the round record is a single
// transaction on `/game/currentRound`: the closure only opens a new round
// when the stored one is missing, inactive or past `endsAt`, which makes the
// transition happen exactly once per expiry. The client whose transaction
// replaced the expired round is the one that tallies it.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::aggregation::{self, TallyReport, TallyRules};
use crate::catalog::{DilemmaCatalog, SelectionPolicy};
use crate::config::GameConfig;
use crate::error::{GameError, GameResult};
use crate::sync::{decode_record, encode_record, paths, ExternalSync, TransactionOutcome};
use crate::types::{ChoiceRecord, Dilemma, GlobalRecord, OptionLabel, Participant, Round};

// ─── Phase ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum RoundPhase {
    Idle,
    #[serde(rename_all = "camelCase")]
    Open { sequence: u64, ends_at: u64 },
    /// Countdown ran out; waiting for the round to be replaced.
    Tallying { sequence: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoundTransition {
    /// A round is still running, or another client won the race.
    Unchanged,
    Opened {
        round: Round,
        /// Present when this client closed the previous round.
        tally: Option<TallyReport>,
    },
}

// ─── Controller ──────────────────────────────────────────────────────────────

pub struct RoundController {
    catalog: Arc<DilemmaCatalog>,
    selection: SelectionPolicy,
    round_duration_ms: u64,
    rules: TallyRules,
    rng: ChaCha8Rng,
    phase: RoundPhase,
    current: Option<Round>,
    /// Expired round whose tally has not reached the store yet.
    pending_tally: Option<Round>,
}

impl RoundController {
    pub fn new(config: &GameConfig, catalog: Arc<DilemmaCatalog>, seed: u64) -> Self {
        Self {
            catalog,
            selection: config.selection,
            round_duration_ms: config.round_duration_ms,
            rules: TallyRules::from(config),
            rng: ChaCha8Rng::seed_from_u64(seed),
            phase: RoundPhase::Idle,
            current: None,
            pending_tally: None,
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn current(&self) -> Option<&Round> {
        self.current.as_ref()
    }

    pub fn catalog(&self) -> &DilemmaCatalog {
        &self.catalog
    }

    pub fn has_pending_tally(&self) -> bool {
        self.pending_tally.is_some()
    }

    /// Dilemma for the current round. An out-of-range index is reported
    /// rather than rendered.
    pub fn current_dilemma(&self) -> GameResult<Option<&Dilemma>> {
        match &self.current {
            Some(round) => self.catalog.get(round.dilemma_index).map(Some),
            None => Ok(None),
        }
    }

    /// Adopt the round record seen in the store. Returns true when it is a
    /// different round from the one held locally, i.e. the countdown restarts.
    pub fn observe(&mut self, round: Option<Round>, now: u64) -> bool {
        let previous = self.current.as_ref().map(|r| r.sequence);
        let changed = round.as_ref().map(|r| r.sequence) != previous;
        self.current = round;
        self.refresh_phase(now);
        if changed {
            if let Some(round) = &self.current {
                debug!(round = round.sequence, dilemma = round.dilemma_index, "round observed");
            }
        }
        changed
    }

    /// Local countdown check. Returns true once the open round has expired.
    pub fn poll_expiry(&mut self, now: u64) -> bool {
        self.refresh_phase(now);
        matches!(self.phase, RoundPhase::Tallying { .. })
    }

    /// True when `ensure_round` could open a new round at `now`.
    pub fn needs_new_round(&self, now: u64) -> bool {
        self.current.as_ref().map_or(true, |r| !r.is_running(now))
    }

    fn refresh_phase(&mut self, now: u64) {
        self.phase = match &self.current {
            None => RoundPhase::Idle,
            Some(r) if !r.active => RoundPhase::Idle,
            Some(r) if r.is_expired(now) => RoundPhase::Tallying { sequence: r.sequence },
            Some(r) => RoundPhase::Open { sequence: r.sequence, ends_at: r.ends_at },
        };
    }

    /// Open a new round if none is running, tallying the one it replaces.
    pub fn ensure_round<S: ExternalSync + ?Sized>(
        &mut self,
        store: &S,
        now: u64,
    ) -> GameResult<RoundTransition> {
        // a tally left over from a failed attempt goes first
        self.flush_pending_tally(store, now)?;

        let floor = self.sequence_floor(store)?;
        let catalog = Arc::clone(&self.catalog);
        let selection = self.selection;
        let duration = self.round_duration_ms;
        let rng = &mut self.rng;

        let mut replaced: Option<Round> = None;
        let mut opened: Option<Round> = None;
        let mut encode_error = None;
        let result = store.transaction(paths::CURRENT_ROUND, &mut |current: Option<&Value>| {
            replaced = None;
            opened = None;
            let previous: Option<Round> = decode_record(paths::CURRENT_ROUND, current);
            if previous.as_ref().map_or(false, |r| r.is_running(now)) {
                return TransactionOutcome::Abort;
            }
            if previous.is_none() && current.map_or(false, |v| !v.is_null()) {
                warn!(floor, "replacing unreadable round record");
            }
            // never reuse a sequence the tally guard has already seen
            let sequence = previous.as_ref().map_or(floor, |r| r.sequence.max(floor)) + 1;
            let index =
                catalog.next_index(selection, previous.as_ref().map(|r| r.dilemma_index), &mut *rng);
            let next = Round::open(sequence, index, now, duration);
            match encode_record(&next) {
                Ok(value) => {
                    replaced = previous;
                    opened = Some(next);
                    TransactionOutcome::Commit(value)
                }
                Err(err) => {
                    encode_error = Some(err);
                    TransactionOutcome::Abort
                }
            }
        })?;
        if let Some(err) = encode_error {
            return Err(err);
        }

        let round = match (result.committed, opened) {
            (true, Some(round)) => round,
            _ => {
                // someone else holds a running round; adopt it
                let current = decode_record(paths::CURRENT_ROUND, result.snapshot.as_ref());
                self.observe(current, now);
                return Ok(RoundTransition::Unchanged);
            }
        };
        info!(round = round.sequence, dilemma = round.dilemma_index, ends_at = round.ends_at, "new round started");
        self.observe(Some(round.clone()), now);

        // a failed tally stays pending; the new round is still ours to announce
        let tally = match replaced {
            Some(expired) if expired.sequence > 0 => {
                self.pending_tally = Some(expired);
                self.flush_pending_tally(store, now).unwrap_or(None)
            }
            _ => None,
        };
        Ok(RoundTransition::Opened { round, tally })
    }

    /// Highest sequence known to be used: the local round or the last tally.
    fn sequence_floor<S: ExternalSync + ?Sized>(&self, store: &S) -> GameResult<u64> {
        let tallied = decode_record::<GlobalRecord>(paths::GLOBAL, store.get(paths::GLOBAL)?.as_ref())
            .map_or(0, |g| g.last_tallied_round);
        let local = self.current.as_ref().map_or(0, |r| r.sequence);
        Ok(tallied.max(local))
    }

    /// Apply the tally for the round this client closed, if still owed.
    pub fn flush_pending_tally<S: ExternalSync + ?Sized>(
        &mut self,
        store: &S,
        now: u64,
    ) -> GameResult<Option<TallyReport>> {
        let Some(expired) = self.pending_tally.as_ref() else {
            return Ok(None);
        };
        match aggregation::tally(store, expired, &self.catalog, &self.rules, now) {
            Ok(report) => {
                self.pending_tally = None;
                Ok(Some(report))
            }
            Err(err) => {
                warn!(round = expired.sequence, error = %err, "tally failed, will retry");
                Err(err)
            }
        }
    }

    /// Record `participant`'s choice for the current round.
    ///
    /// Rejected with `AlreadySubmitted` when the participant already voted
    /// and `RoundClosed` outside `[startedAt, endsAt]`; neither mutates the
    /// round. Both checks run again inside the transaction against the
    /// stored round, so a stale local view cannot double-vote.
    pub fn submit_choice<S: ExternalSync + ?Sized>(
        &mut self,
        store: &S,
        participant: &Participant,
        label: OptionLabel,
        now: u64,
    ) -> GameResult<ChoiceRecord> {
        let round = self.current.as_ref().ok_or(GameError::NoActiveRound)?;
        if round.has_choice_from(&participant.id) {
            return Err(GameError::AlreadySubmitted);
        }
        if !round.accepts_at(now) {
            return Err(GameError::RoundClosed);
        }
        let dilemma = self.catalog.get(round.dilemma_index)?;
        let record = ChoiceRecord {
            choice: label,
            impact: dilemma.option(label).impact.clone(),
            player_id: participant.id.clone(),
            player_name: participant.name.clone(),
            submitted_at: now,
            dilemma_id: dilemma.id,
        };
        let expected_sequence = round.sequence;

        let mut rejection: Option<GameError> = None;
        let mut updated: Option<Round> = None;
        store.transaction(paths::CURRENT_ROUND, &mut |current: Option<&Value>| {
            rejection = None;
            updated = None;
            let Some(mut stored) = decode_record::<Round>(paths::CURRENT_ROUND, current) else {
                rejection = Some(GameError::NoActiveRound);
                return TransactionOutcome::Abort;
            };
            if stored.sequence != expected_sequence || !stored.accepts_at(now) {
                rejection = Some(GameError::RoundClosed);
                return TransactionOutcome::Abort;
            }
            if stored.has_choice_from(&record.player_id) {
                rejection = Some(GameError::AlreadySubmitted);
                return TransactionOutcome::Abort;
            }
            stored.choices.insert(record.player_id.clone(), record.clone());
            match encode_record(&stored) {
                Ok(value) => {
                    updated = Some(stored);
                    TransactionOutcome::Commit(value)
                }
                Err(err) => {
                    rejection = Some(err);
                    TransactionOutcome::Abort
                }
            }
        })?;

        if let Some(err) = rejection {
            debug!(player = %participant.id, error = %err, "choice rejected");
            return Err(err);
        }
        if let Some(round) = updated {
            self.current = Some(round);
            self.refresh_phase(now);
        }
        info!(player = %participant.id, choice = %label, round = expected_sequence, "choice submitted");
        Ok(record)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
