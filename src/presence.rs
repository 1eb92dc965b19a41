// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Presence
//
// Tracks who is connected. Joining is an idempotent upsert under
// `/players/{id}`; leaving is normally the store's disconnect cleanup.

use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::error::{GameError, GameResult};
use crate::sync::{decode_record, encode_record, paths, ExternalSync, TransactionOutcome};
use crate::types::Participant;

const NAME_STEMS: [&str; 6] = ["Guardian", "Visionary", "Steward", "Pioneer", "Harmonist", "Catalyst"];
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A fresh local identity: `player_<ms>_<9 base-36 chars>`, a themed name
/// and a palette colour.
pub fn generate_identity<R: Rng + ?Sized>(rng: &mut R, palette: &[String], now: u64) -> Participant {
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    let stem = NAME_STEMS[rng.gen_range(0..NAME_STEMS.len())];
    let color = if palette.is_empty() {
        "#FFFFFF".to_string()
    } else {
        palette[rng.gen_range(0..palette.len())].clone()
    };
    Participant {
        id: format!("player_{now}_{suffix}"),
        name: format!("{stem}_{}", rng.gen_range(0..100)),
        color,
        joined_at: now,
        last_active: now,
    }
}

#[derive(Debug, Clone)]
pub struct PresenceTracker {
    participants: BTreeMap<String, Participant>,
    min_participants: usize,
    max_participants: usize,
}

impl PresenceTracker {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            participants: BTreeMap::new(),
            min_participants: config.min_participants.max(1),
            max_participants: config.max_participants.max(1),
        }
    }

    /// Upsert `participant` and register removal on disconnect. A new id is
    /// refused once the game is full; an id already present may always rejoin.
    pub fn join<S: ExternalSync + ?Sized>(&self, store: &S, participant: &Participant) -> GameResult<()> {
        let record = encode_record(participant)?;
        let max = self.max_participants;
        let mut full = false;
        let result = store.transaction(paths::PLAYERS, &mut |current: Option<&Value>| {
            let mut players = current.and_then(Value::as_object).cloned().unwrap_or_default();
            full = !players.contains_key(&participant.id) && players.len() >= max;
            if full {
                return TransactionOutcome::Abort;
            }
            players.insert(participant.id.clone(), record.clone());
            TransactionOutcome::Commit(Value::Object(players))
        })?;
        if !result.committed {
            warn!(player = %participant.id, max, "join refused, game is full");
            return Err(GameError::SessionFull { max });
        }
        store.on_disconnect_remove(&paths::player(&participant.id))?;
        info!(player = %participant.id, name = %participant.name, "player joined");
        Ok(())
    }

    /// Orderly leave. Abrupt leaves go through the disconnect cleanup.
    pub fn leave<S: ExternalSync + ?Sized>(&mut self, store: &S, participant_id: &str) -> GameResult<()> {
        store.remove(&paths::player(participant_id))?;
        self.participants.remove(participant_id);
        Ok(())
    }

    /// Refresh `lastActive`. Does nothing when the record is gone, so a late
    /// heartbeat cannot resurrect a participant removed on disconnect.
    pub fn heartbeat<S: ExternalSync + ?Sized>(
        &self,
        store: &S,
        participant_id: &str,
        now: u64,
    ) -> GameResult<bool> {
        let result = store.transaction(&paths::player(participant_id), &mut |current: Option<&Value>| {
            match current.and_then(Value::as_object) {
                Some(fields) => {
                    let mut fields = fields.clone();
                    fields.insert("lastActive".into(), json!(now));
                    TransactionOutcome::Commit(Value::Object(fields))
                }
                None => TransactionOutcome::Abort,
            }
        })?;
        Ok(result.committed)
    }

    pub fn rename<S: ExternalSync + ?Sized>(&self, store: &S, participant_id: &str, name: &str) -> GameResult<()> {
        let mut fields = Map::new();
        fields.insert("name".into(), json!(name));
        store.update(&paths::player(participant_id), fields)?;
        Ok(())
    }

    /// Replace the local view from a `/players` snapshot. Entries that do not
    /// decode are skipped; an empty stored id is filled from the key.
    pub fn apply_snapshot(&mut self, value: Option<&Value>) {
        self.participants.clear();
        let Some(players) = value.and_then(Value::as_object) else {
            return;
        };
        for (key, raw) in players {
            let path = paths::player(key);
            if let Some(mut participant) = decode_record::<Participant>(&path, Some(raw)) {
                if participant.id.is_empty() {
                    participant.id = key.clone();
                }
                self.participants.insert(key.clone(), participant);
            }
        }
        debug!(count = self.participants.len(), "players updated");
    }

    pub fn count(&self) -> usize {
        self.participants.len()
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.participants.contains_key(participant_id)
    }

    pub fn get(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.get(participant_id)
    }

    /// Participants ordered by join time, then id.
    pub fn participants(&self) -> Vec<&Participant> {
        let mut list: Vec<&Participant> = self.participants.values().collect();
        list.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Gate for the round controller.
    pub fn should_run_rounds(&self) -> bool {
        self.count() >= self.min_participants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::MemoryStore;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn participant(id: &str, joined_at: u64) -> Participant {
        Participant {
            id: id.to_string(),
            name: format!("Pioneer_{joined_at}"),
            color: "#4ECDC4".to_string(),
            joined_at,
            last_active: joined_at,
        }
    }

    #[test]
    fn test_identity_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let palette = GameConfig::default().palette;
        let me = generate_identity(&mut rng, &palette, 1_700_000_000_000);

        assert!(me.id.starts_with("player_1700000000000_"));
        assert_eq!(me.id.len(), "player_1700000000000_".len() + 9);
        let (stem, number) = me.name.split_once('_').unwrap();
        assert!(NAME_STEMS.contains(&stem));
        assert!(number.parse::<u32>().unwrap() < 100);
        assert!(palette.contains(&me.color));
    }

    #[test]
    fn test_join_is_idempotent_and_gated() {
        let store = MemoryStore::shared();
        let conn = store.connect();
        let mut presence = PresenceTracker::new(&GameConfig::default());

        let p1 = participant("p1", 1);
        presence.join(&conn, &p1).unwrap();
        presence.join(&conn, &p1).unwrap();
        presence.apply_snapshot(conn.get(paths::PLAYERS).unwrap().as_ref());
        assert_eq!(presence.count(), 1);
        assert!(!presence.should_run_rounds());

        presence.join(&conn, &participant("p2", 2)).unwrap();
        presence.apply_snapshot(conn.get(paths::PLAYERS).unwrap().as_ref());
        assert!(presence.should_run_rounds());
        let ids: Vec<&str> = presence.participants().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[test]
    fn test_full_game_refuses_new_ids_only() {
        let store = MemoryStore::shared();
        let conn = store.connect();
        let config = GameConfig { max_participants: 2, ..GameConfig::default() };
        let presence = PresenceTracker::new(&config);

        presence.join(&conn, &participant("p1", 1)).unwrap();
        presence.join(&conn, &participant("p2", 2)).unwrap();
        assert!(matches!(
            presence.join(&conn, &participant("p3", 3)),
            Err(GameError::SessionFull { max: 2 })
        ));
        presence.join(&conn, &participant("p2", 2)).unwrap();
    }

    #[test]
    fn test_disconnect_removes_player() {
        let store = MemoryStore::shared();
        let alice = store.connect();
        let bob = store.connect();
        let mut presence = PresenceTracker::new(&GameConfig::default());

        presence.join(&alice, &participant("alice", 1)).unwrap();
        presence.join(&bob, &participant("bob", 2)).unwrap();
        bob.go_offline();

        presence.apply_snapshot(alice.get(paths::PLAYERS).unwrap().as_ref());
        assert!(presence.contains("alice"));
        assert!(!presence.contains("bob"));
    }

    #[test]
    fn test_heartbeat_does_not_resurrect() {
        let store = MemoryStore::shared();
        let conn = store.connect();
        let mut presence = PresenceTracker::new(&GameConfig::default());
        presence.join(&conn, &participant("p1", 1)).unwrap();

        assert!(presence.heartbeat(&conn, "p1", 99).unwrap());
        assert_eq!(store.snapshot("players/p1/lastActive"), Some(json!(99)));

        presence.leave(&conn, "p1").unwrap();
        assert!(!presence.heartbeat(&conn, "p1", 120).unwrap());
        assert!(store.snapshot("players/p1").is_none());
    }

    #[test]
    fn test_rename_and_snapshot_fills_missing_id() {
        let store = MemoryStore::shared();
        let conn = store.connect();
        let mut presence = PresenceTracker::new(&GameConfig::default());

        conn.set("players/p7", json!({ "name": "Guardian_7", "joinedAt": 5 })).unwrap();
        presence.rename(&conn, "p7", "Ada").unwrap();
        presence.apply_snapshot(conn.get(paths::PLAYERS).unwrap().as_ref());

        let p = presence.get("p7").unwrap();
        assert_eq!(p.id, "p7");
        assert_eq!(p.name, "Ada");
        assert_eq!(p.initial(), 'A');
    }
}
