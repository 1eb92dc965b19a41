// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Client Session
//
// One `GameSession` per client. It owns the client's identity, its view of
// the shared state, and the controllers that act on the store. The host
// drives it with `tick(now)` and reads `view(now)` / `drain_events()` for
// presentation.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::DilemmaCatalog;
use crate::config::GameConfig;
use crate::error::{GameError, GameResult};
use crate::presence::{generate_identity, PresenceTracker};
use crate::round::{RoundController, RoundPhase, RoundTransition};
use crate::sync::{decode_record, encode_record, paths, ExternalSync, Subscription, TransactionOutcome};
use crate::types::{
    ChoiceRecord, EcosystemState, GlobalRecord, OptionLabel, Participant, PlayerStats, Round, RoundSummary,
};
use crate::view::{GameView, RejectReason, SessionEvent};

/// Live feeds from the store. Opened once; the store replays current values
/// on reconnect.
struct Feeds {
    global: Subscription,
    players: Subscription,
    round: Subscription,
    last_tally: Subscription,
}

pub struct GameSession<S: ExternalSync> {
    store: S,
    config: GameConfig,
    me: Participant,
    stats: PlayerStats,
    joined: bool,
    connected: bool,
    presence: PresenceTracker,
    rounds: RoundController,
    ecosystem: EcosystemState,
    last_updated: u64,
    last_tally: Option<RoundSummary>,
    /// Set once the replayed tally has been seen; later ones are news.
    tally_primed: bool,
    feeds: Option<Feeds>,
    last_heartbeat: u64,
    events: VecDeque<SessionEvent>,
}

impl<S: ExternalSync> GameSession<S> {
    /// Start a session with a freshly generated identity.
    pub fn start(store: S, config: GameConfig, catalog: Arc<DilemmaCatalog>, seed: u64, now: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let me = generate_identity(&mut rng, &config.palette, now);
        Self::start_as(store, config, catalog, me, rng.gen(), now)
    }

    /// Start a session for a known participant.
    pub fn start_as(
        store: S,
        config: GameConfig,
        catalog: Arc<DilemmaCatalog>,
        me: Participant,
        seed: u64,
        now: u64,
    ) -> Self {
        let mut session = Self {
            presence: PresenceTracker::new(&config),
            rounds: RoundController::new(&config, catalog, seed),
            ecosystem: config.initial_state.clamped(&config.bounds),
            store,
            config,
            me,
            stats: PlayerStats::default(),
            joined: false,
            connected: false,
            last_updated: 0,
            last_tally: None,
            tally_primed: false,
            feeds: None,
            last_heartbeat: now,
            events: VecDeque::new(),
        };
        session.connect(now);
        session
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn me(&self) -> &Participant {
        &self.me
    }

    pub fn stats(&self) -> &PlayerStats {
        &self.stats
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ecosystem(&self) -> &EcosystemState {
        &self.ecosystem
    }

    /// Server time of the last ecosystem write seen.
    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn rounds(&self) -> &RoundController {
        &self.rounds
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.current()
    }

    pub fn phase(&self) -> RoundPhase {
        self.rounds.phase()
    }

    pub fn last_tally(&self) -> Option<&RoundSummary> {
        self.last_tally.as_ref()
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The local participant's choice in the current round, if any.
    pub fn my_choice(&self) -> Option<OptionLabel> {
        self.rounds.current().and_then(|r| r.choices.get(&self.me.id)).map(|c| c.choice)
    }

    pub fn view(&self, now: u64) -> GameView {
        GameView::build(self, now)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    // ─── Player actions ──────────────────────────────────────────────────────

    /// Register presence. Safe to call again; a rejoin just refreshes the
    /// record.
    pub fn join(&mut self, now: u64) -> GameResult<()> {
        if !self.joined {
            self.me.joined_at = now;
        }
        self.me.last_active = now;
        if let Err(err) = self.presence.join(&self.store, &self.me) {
            self.note_failure(&err);
            return Err(err);
        }
        self.joined = true;
        self.last_heartbeat = now;
        self.events.push_back(SessionEvent::Joined { name: self.me.name.clone() });

        self.pump(now);
        self.advance_rounds(now);
        Ok(())
    }

    pub fn submit_choice(&mut self, label: OptionLabel, now: u64) -> GameResult<ChoiceRecord> {
        if !self.joined {
            return Err(self.reject(GameError::NotJoined));
        }
        self.pump(now);
        match self.rounds.submit_choice(&self.store, &self.me, label, now) {
            Ok(record) => {
                self.stats.record(&record);
                self.events.push_back(SessionEvent::ChoiceAccepted { choice: label });
                Ok(record)
            }
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Parse-and-submit for hosts that pass the option as text.
    pub fn submit_choice_str(&mut self, option: &str, now: u64) -> GameResult<ChoiceRecord> {
        match option.parse::<OptionLabel>() {
            Ok(label) => self.submit_choice(label, now),
            Err(err) => Err(self.reject(err)),
        }
    }

    /// Change the display name. Blank names are ignored.
    pub fn rename(&mut self, name: &str) -> GameResult<()> {
        let name = name.trim();
        if name.is_empty() || name == self.me.name {
            return Ok(());
        }
        self.me.name = name.to_string();
        if self.joined {
            if let Err(err) = self.presence.rename(&self.store, &self.me.id, name) {
                self.note_failure(&err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Orderly leave. The session stays usable and may join again.
    pub fn leave(&mut self) -> GameResult<()> {
        if !self.joined {
            return Ok(());
        }
        self.presence.leave(&self.store, &self.me.id)?;
        self.joined = false;
        Ok(())
    }

    /// Settle any owed tally, leave, drop the feeds and hand the store back.
    pub fn teardown(mut self, now: u64) -> S {
        // no other client holds the choices of a round this one replaced
        if let Err(err) = self.rounds.flush_pending_tally(&self.store, now) {
            warn!(error = %err, "owed tally lost at teardown");
        }
        if let Err(err) = self.leave() {
            debug!(error = %err, "leave during teardown failed");
        }
        self.feeds = None;
        self.store
    }

    // ─── Driving ─────────────────────────────────────────────────────────────

    /// Advance the session to `now`: consume store updates, keep presence
    /// alive, and open or close rounds when due.
    pub fn tick(&mut self, now: u64) {
        if self.feeds.is_none() {
            self.connect(now);
        }
        self.track_connection(now);
        self.pump(now);

        if self.joined
            && self.connected
            && now.saturating_sub(self.last_heartbeat) >= self.config.heartbeat_interval_ms
        {
            self.last_heartbeat = now;
            match self.presence.heartbeat(&self.store, &self.me.id, now) {
                Ok(true) => self.me.last_active = now,
                Ok(false) => debug!(player = %self.me.id, "heartbeat skipped, no player record"),
                Err(err) => self.note_failure(&err),
            }
        }

        self.advance_rounds(now);
    }

    fn connect(&mut self, now: u64) {
        match self.open_feeds(now) {
            Ok(feeds) => {
                self.feeds = Some(feeds);
                self.set_connected(true);
                self.pump(now);
            }
            Err(err) => self.note_failure(&err),
        }
    }

    fn open_feeds(&self, now: u64) -> GameResult<Feeds> {
        self.seed_global(now)?;
        Ok(Feeds {
            global: self.store.subscribe(paths::GLOBAL)?,
            players: self.store.subscribe(paths::PLAYERS)?,
            round: self.store.subscribe(paths::CURRENT_ROUND)?,
            last_tally: self.store.subscribe(paths::LAST_TALLY)?,
        })
    }

    /// Create `/global` with the initial state unless it already exists.
    fn seed_global(&self, now: u64) -> GameResult<()> {
        let record = encode_record(&GlobalRecord {
            state: self.config.initial_state.clamped(&self.config.bounds),
            last_updated: now,
            last_tallied_round: 0,
        })?;
        let result = self.store.transaction(paths::GLOBAL, &mut |current: Option<&Value>| match current {
            Some(_) => TransactionOutcome::Abort,
            None => TransactionOutcome::Commit(record.clone()),
        })?;
        if result.committed {
            info!("ecosystem initialised");
        }
        Ok(())
    }

    fn track_connection(&mut self, now: u64) {
        let online = self.store.is_connected();
        if online == self.connected {
            return;
        }
        self.set_connected(online);
        if online && self.joined {
            // the disconnect cleanup removed our record
            self.me.last_active = now;
            match self.presence.join(&self.store, &self.me) {
                Ok(()) => self.last_heartbeat = now,
                Err(err) => self.note_failure(&err),
            }
        }
    }

    /// Consume pending store updates.
    fn pump(&mut self, now: u64) {
        let Some(feeds) = self.feeds.as_mut() else {
            return;
        };
        let global = feeds.global.latest();
        let players = feeds.players.latest();
        let round = feeds.round.latest();
        let last_tally = feeds.last_tally.latest();

        if let Some(value) = global {
            self.apply_global(value.as_ref());
        }
        if let Some(value) = players {
            self.presence.apply_snapshot(value.as_ref());
        }
        if let Some(value) = round {
            let round: Option<Round> = decode_record(paths::CURRENT_ROUND, value.as_ref());
            if self.rounds.observe(round, now) {
                self.announce_round();
            }
        }
        if let Some(value) = last_tally {
            self.apply_last_tally(value.as_ref());
        }
        self.rounds.poll_expiry(now);
    }

    fn apply_global(&mut self, value: Option<&Value>) {
        match decode_record::<GlobalRecord>(paths::GLOBAL, value) {
            Some(record) => {
                self.ecosystem = record.state.clamped(&self.config.bounds);
                self.last_updated = record.last_updated;
            }
            None => self.ecosystem = self.config.initial_state.clamped(&self.config.bounds),
        }
    }

    fn apply_last_tally(&mut self, value: Option<&Value>) {
        let primed = std::mem::replace(&mut self.tally_primed, true);
        let Some(summary) = decode_record::<RoundSummary>(paths::LAST_TALLY, value) else {
            return;
        };
        // the first snapshot is history, not news
        let is_new =
            primed && self.last_tally.as_ref().map_or(true, |seen| summary.sequence > seen.sequence);
        if is_new {
            self.events.push_back(SessionEvent::RoundTallied { summary: summary.clone() });
        }
        if self.last_tally.as_ref().map_or(true, |seen| summary.sequence >= seen.sequence) {
            self.last_tally = Some(summary);
        }
    }

    fn announce_round(&mut self) {
        let Some(round) = self.rounds.current() else {
            return;
        };
        if !round.active {
            return;
        }
        let sequence = round.sequence;
        match self.rounds.current_dilemma() {
            Ok(Some(dilemma)) => {
                let dilemma_id = dilemma.id;
                self.events.push_back(SessionEvent::RoundStarted { sequence, dilemma_id });
            }
            Ok(None) => {}
            Err(err) => warn!(round = sequence, error = %err, "round references an unknown dilemma"),
        }
    }

    /// Open a round when one is due and enough players are present.
    fn advance_rounds(&mut self, now: u64) {
        if !self.connected {
            return;
        }
        if self.rounds.has_pending_tally() {
            if let Err(err) = self.rounds.flush_pending_tally(&self.store, now) {
                self.note_failure(&err);
                return;
            }
        }
        if !self.presence.should_run_rounds() || !self.rounds.needs_new_round(now) {
            return;
        }
        match self.rounds.ensure_round(&self.store, now) {
            Ok(RoundTransition::Opened { .. }) => {
                self.announce_round();
                // pick up the tally summary and the new ecosystem right away
                self.pump(now);
            }
            Ok(RoundTransition::Unchanged) => {}
            Err(err) => self.note_failure(&err),
        }
    }

    // ─── Failure handling ────────────────────────────────────────────────────

    fn set_connected(&mut self, connected: bool) {
        if self.connected == connected {
            return;
        }
        self.connected = connected;
        if connected {
            info!(player = %self.me.id, "connected to game store");
            self.events.push_back(SessionEvent::Connected);
        } else {
            warn!(player = %self.me.id, "lost connection to game store");
            self.events.push_back(SessionEvent::Disconnected);
        }
    }

    fn note_failure(&mut self, err: &GameError) {
        match err {
            GameError::ConnectionUnavailable => self.set_connected(false),
            other => warn!(player = %self.me.id, error = %other, "store operation failed"),
        }
    }

    /// Surface a rejected choice to the player and hand the error back.
    fn reject(&mut self, err: GameError) -> GameError {
        if err.is_user_facing() {
            self.events.push_back(SessionEvent::ChoiceRejected {
                reason: RejectReason::from_error(&err),
                message: err.to_string(),
            });
        } else {
            self.note_failure(&err);
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{GlobalLock, MemoryConnection, MemoryStore};

    fn session(store: &Arc<MemoryStore>, seed: u64, now: u64) -> GameSession<MemoryConnection> {
        GameSession::start(store.connect(), GameConfig::default(), Arc::new(DilemmaCatalog::builtin()), seed, now)
    }

    #[test]
    fn test_start_seeds_global_once() {
        let store = MemoryStore::shared();
        let mut first = session(&store, 1, 0);
        assert!(first.is_connected());
        assert_eq!(store.snapshot("global/eco"), Some(serde_json::json!(10)));

        let conn = store.connect();
        conn.set("global/eco", serde_json::json!(14)).unwrap();
        let mut second = session(&store, 2, 10);
        second.tick(10);
        first.tick(10);
        assert_eq!(second.ecosystem().eco, 14);
        assert_eq!(first.ecosystem().eco, 14);
        assert_eq!(first.drain_events(), vec![SessionEvent::Connected]);
    }

    #[test]
    fn test_choice_before_join_is_rejected() {
        let store = MemoryStore::shared();
        let mut s = session(&store, 3, 0);
        s.drain_events();
        assert!(matches!(s.submit_choice(OptionLabel::A, 5), Err(GameError::NotJoined)));
        assert!(matches!(
            s.drain_events().as_slice(),
            [SessionEvent::ChoiceRejected { reason: RejectReason::NotJoined, .. }]
        ));
    }

    #[test]
    fn test_single_player_waits_for_company() {
        let store = MemoryStore::shared();
        let mut s = session(&store, 4, 0);
        s.join(0).unwrap();
        s.tick(1_000);
        assert!(s.current_round().is_none());
        assert_eq!(s.phase(), RoundPhase::Idle);
    }

    #[test]
    fn test_solo_config_plays_alone() {
        let store = MemoryStore::shared();
        let mut s = GameSession::start(
            store.connect(),
            GameConfig::solo(),
            Arc::new(DilemmaCatalog::builtin()),
            5,
            0,
        );
        s.join(0).unwrap();
        assert_eq!(s.current_round().map(|r| r.sequence), Some(1));

        let record = s.submit_choice(OptionLabel::B, 1_000).unwrap();
        assert_eq!(record.player_id, s.me().id);
        assert_eq!(s.stats().choices_made, 1);
        assert_eq!(s.my_choice(), Some(OptionLabel::B));
        assert!(matches!(s.submit_choice(OptionLabel::A, 2_000), Err(GameError::AlreadySubmitted)));
        assert_eq!(s.stats().choices_made, 1);
    }

    #[test]
    fn test_rename_updates_record() {
        let store = MemoryStore::shared();
        let mut s = session(&store, 6, 0);
        s.join(0).unwrap();
        s.rename("  Ada  ").unwrap();
        s.rename("   ").unwrap();
        assert_eq!(s.me().name, "Ada");
        let path = format!("players/{}/name", s.me().id);
        assert_eq!(store.snapshot(&path), Some(serde_json::json!("Ada")));
    }

    #[test]
    fn test_heartbeat_interval() {
        let store = MemoryStore::shared();
        let mut s = session(&store, 7, 0);
        s.join(0).unwrap();
        let path = format!("players/{}/lastActive", s.me().id);

        s.tick(4_999);
        assert_eq!(store.snapshot(&path), Some(serde_json::json!(0)));
        s.tick(5_000);
        assert_eq!(store.snapshot(&path), Some(serde_json::json!(5_000)));
    }

    #[test]
    fn test_reconnect_rejoins() {
        let store = MemoryStore::shared();
        let mut s = session(&store, 8, 0);
        s.join(0).unwrap();
        let path = format!("players/{}", s.me().id);

        s.store().go_offline();
        s.tick(100);
        assert!(!s.is_connected());
        assert!(store.snapshot(&path).is_none());

        s.store().go_online();
        s.tick(200);
        assert!(s.is_connected());
        assert!(store.snapshot(&path).is_some());
        let events = s.drain_events();
        assert!(events.contains(&SessionEvent::Disconnected));
        assert_eq!(events.last(), Some(&SessionEvent::Connected));
    }

    #[test]
    fn test_teardown_settles_owed_tally() {
        let store = MemoryStore::shared();
        let lock = GlobalLock::new(store.connect(), false);
        let mut s = GameSession::start(lock, GameConfig::solo(), Arc::new(DilemmaCatalog::builtin()), 9, 0);
        s.join(0).unwrap();
        s.submit_choice(OptionLabel::B, 1_000).unwrap();

        s.store().set_locked(true);
        s.tick(30_001);
        assert_eq!(s.current_round().map(|r| r.sequence), Some(2));
        assert!(s.rounds().has_pending_tally());
        assert!(s.drain_events().iter().any(|e| matches!(e, SessionEvent::RoundStarted { sequence: 2, .. })));

        s.store().set_locked(false);
        let me = s.me().id.clone();
        let lock = s.teardown(30_500);
        assert_eq!(store.snapshot("global/lastTalliedRound"), Some(serde_json::json!(1)));
        assert!(lock.conn.get(&paths::player(&me)).unwrap().is_none());
    }
}
