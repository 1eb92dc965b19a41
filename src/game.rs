// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Hot-Seat Game Host
//
// Several local seats share one in-memory store, each with its own
// connection and session. The browser bindings in `lib.rs` wrap this type.

use serde::Serialize;
use std::sync::Arc;
use wasm_bindgen::prelude::*;

use crate::catalog::DilemmaCatalog;
use crate::config::GameConfig;
use crate::error::{GameError, GameResult};
use crate::session::GameSession;
use crate::sync::{MemoryConnection, MemoryStore};
use crate::view::{Notification, SessionEvent, SoundCue};

pub type Seat = GameSession<MemoryConnection>;

/// An event together with what to show and play for it.
#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub event: SessionEvent,
    pub notification: Notification,
    pub sound: Option<SoundCue>,
}

impl From<SessionEvent> for Notice {
    fn from(event: SessionEvent) -> Self {
        Self { notification: event.notification(), sound: event.sound(), event }
    }
}

#[wasm_bindgen]
pub struct EcosystemGame {
    store: Arc<MemoryStore>,
    config: GameConfig,
    catalog: Arc<DilemmaCatalog>,
    seats: Vec<Seat>,
    seed: u64,
}

impl EcosystemGame {
    pub fn with_parts(config: GameConfig, catalog: DilemmaCatalog, seed: u64) -> Self {
        Self {
            store: MemoryStore::shared(),
            config,
            catalog: Arc::new(catalog),
            seats: Vec::new(),
            seed,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    /// Open a new local seat and return its index.
    pub fn open_seat(&mut self, now: u64) -> usize {
        let index = self.seats.len();
        let seat = GameSession::start(
            self.store.connect(),
            self.config.clone(),
            Arc::clone(&self.catalog),
            self.seed.wrapping_add(index as u64),
            now,
        );
        self.seats.push(seat);
        index
    }

    pub fn seat(&self, index: usize) -> GameResult<&Seat> {
        self.seats.get(index).ok_or(GameError::UnknownSeat(index))
    }

    pub fn seat_mut(&mut self, index: usize) -> GameResult<&mut Seat> {
        self.seats.get_mut(index).ok_or(GameError::UnknownSeat(index))
    }

    pub fn tick_all(&mut self, now: u64) {
        for seat in &mut self.seats {
            seat.tick(now);
        }
    }

    pub fn notices(&mut self, index: usize) -> GameResult<Vec<Notice>> {
        Ok(self.seat_mut(index)?.drain_events().into_iter().map(Notice::from).collect())
    }
}

impl Default for EcosystemGame {
    fn default() -> Self {
        Self::with_parts(GameConfig::default(), DilemmaCatalog::builtin(), 0)
    }
}
