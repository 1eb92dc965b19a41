// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine ("Ethical Ecosystem")

pub mod types;
pub mod error;
pub mod ecosystem;
pub mod config;
pub mod catalog;
pub mod sync;
pub mod aggregation;
pub mod presence;
pub mod round;
pub mod session;
pub mod view;
pub mod game;

pub use types::*;
pub use error::{GameError, GameResult, SyncError};
pub use ecosystem::{health_with, HealthStatus, HealthWeights, MetricBounds};
pub use config::GameConfig;
pub use catalog::{DilemmaCatalog, SelectionPolicy};
pub use sync::{ExternalSync, MemoryConnection, MemoryStore};
pub use round::{RoundController, RoundPhase, RoundTransition};
pub use session::GameSession;
pub use view::{GameView, SessionEvent};
pub use game::EcosystemGame;

use rust_decimal::prelude::ToPrimitive;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

fn js_error(err: GameError) -> JsValue {
    let message = err.to_string();
    #[cfg(target_arch = "wasm32")]
    log(&format!("ecosystem: {message}"));
    JsValue::from_str(&message)
}

/// Milliseconds from `Date.now()`. Negative or NaN clamps to 0.
fn millis(now: f64) -> u64 {
    now.max(0.0) as u64
}

// ─── WASM Interface ──────────────────────────────────────────────────────────

#[wasm_bindgen]
impl EcosystemGame {
    #[wasm_bindgen(constructor)]
    pub fn new(seed: u32) -> Self {
        #[cfg(target_arch = "wasm32")]
        std::panic::set_hook(Box::new(console_error_panic_hook::hook));

        Self::with_parts(GameConfig::default(), DilemmaCatalog::builtin(), seed as u64)
    }

    /// Build from a partial `GameConfig` JSON document.
    pub fn from_config_json(config_json: &str, seed: u32) -> Result<EcosystemGame, JsValue> {
        #[cfg(target_arch = "wasm32")]
        std::panic::set_hook(Box::new(console_error_panic_hook::hook));

        let config = GameConfig::from_json(config_json).map_err(js_error)?;
        Ok(Self::with_parts(config, DilemmaCatalog::builtin(), seed as u64))
    }

    pub fn add_seat(&mut self, now: f64) -> u32 {
        self.open_seat(millis(now)) as u32
    }

    pub fn seat_count(&self) -> u32 {
        self.seats().len() as u32
    }

    pub fn join(&mut self, seat: u32, now: f64) -> Result<(), JsValue> {
        self.seat_mut(seat as usize).and_then(|s| s.join(millis(now))).map_err(js_error)
    }

    /// Submit "A" or "B" for the seat's participant.
    pub fn choose(&mut self, seat: u32, option: &str, now: f64) -> Result<(), JsValue> {
        self.seat_mut(seat as usize)
            .and_then(|s| s.submit_choice_str(option, millis(now)))
            .map(|_| ())
            .map_err(js_error)
    }

    pub fn rename(&mut self, seat: u32, name: &str) -> Result<(), JsValue> {
        self.seat_mut(seat as usize).and_then(|s| s.rename(name)).map_err(js_error)
    }

    /// Simulate the seat's connection dropping.
    pub fn disconnect(&mut self, seat: u32) {
        if let Ok(s) = self.seat(seat as usize) {
            s.store().go_offline();
        }
    }

    pub fn reconnect(&mut self, seat: u32) {
        if let Ok(s) = self.seat(seat as usize) {
            s.store().go_online();
        }
    }

    pub fn tick(&mut self, now: f64) {
        self.tick_all(millis(now));
    }

    pub fn view(&self, seat: u32, now: f64) -> JsValue {
        match self.seat(seat as usize) {
            Ok(s) => serde_wasm_bindgen::to_value(&s.view(millis(now))).unwrap_or(JsValue::NULL),
            Err(_) => JsValue::NULL,
        }
    }

    /// Pending notifications and sound cues for a seat, oldest first.
    pub fn drain_events(&mut self, seat: u32) -> JsValue {
        match self.notices(seat as usize) {
            Ok(notices) => serde_wasm_bindgen::to_value(&notices).unwrap_or(JsValue::NULL),
            Err(_) => JsValue::NULL,
        }
    }
}

/// Health for a metric vector with the default weights, 0..=100.
#[wasm_bindgen]
pub fn ecosystem_health(eco: i32, pollution: i32, inclusivity: i32, transparency: i32, innovation: i32) -> f64 {
    let state = EcosystemState::new(
        eco as i64,
        pollution as i64,
        inclusivity as i64,
        transparency as i64,
        innovation as i64,
    );
    state.health().to_f64().unwrap_or(0.0)
}
