// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - External Sync
//
// The hosted realtime store is a collaborator. Game logic only talks to it
// through `ExternalSync`; every mutation that depends on the current remote
// value goes through `transaction`.

pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::warn;

use crate::error::{GameResult, SyncError};

pub use memory::{MemoryConnection, MemoryStore};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

pub mod paths {
    pub const GLOBAL: &str = "global";
    pub const PLAYERS: &str = "players";
    pub const CURRENT_ROUND: &str = "game/currentRound";
    pub const LAST_TALLY: &str = "game/lastTally";
    pub const ROUNDS: &str = "rounds";

    pub fn player(id: &str) -> String {
        format!("{PLAYERS}/{id}")
    }

    pub fn choice(participant_id: &str) -> String {
        format!("{CURRENT_ROUND}/choices/{participant_id}")
    }

    pub fn round_summary(sequence: u64) -> String {
        format!("{ROUNDS}/{sequence}")
    }

    /// Split a store path into its non-empty segments.
    pub fn segments(path: &str) -> Vec<&str> {
        path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// What a transaction closure decides after seeing the current value.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    /// Write this value. `Value::Null` deletes the path.
    Commit(Value),
    /// Leave the path untouched.
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    pub committed: bool,
    /// Value at the path after the transaction finished.
    pub snapshot: Option<Value>,
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Stream of value-changed events for one path. The current value is
/// replayed first. Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    receiver: UnboundedReceiver<Option<Value>>,
}

impl Subscription {
    pub fn new(path: impl Into<String>, receiver: UnboundedReceiver<Option<Value>>) -> Self {
        Self { path: path.into(), receiver }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next pending event, if any. `Some(None)` means the path was removed.
    pub fn try_next(&mut self) -> Option<Option<Value>> {
        self.receiver.try_recv().ok()
    }

    /// Drain pending events and keep only the most recent one.
    pub fn latest(&mut self) -> Option<Option<Value>> {
        let mut last = None;
        while let Some(event) = self.try_next() {
            last = Some(event);
        }
        last
    }
}

// ---------------------------------------------------------------------------
// ExternalSync
// ---------------------------------------------------------------------------

pub trait ExternalSync {
    fn is_connected(&self) -> bool;

    /// One-shot read.
    fn get(&self, path: &str) -> Result<Option<Value>, SyncError>;

    fn subscribe(&self, path: &str) -> Result<Subscription, SyncError>;

    /// Unconditional overwrite.
    fn set(&self, path: &str, value: Value) -> Result<(), SyncError>;

    /// Merge `fields` into the object at `path`. Null fields are removed.
    fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), SyncError>;

    fn remove(&self, path: &str) -> Result<(), SyncError>;

    /// Atomic compare-and-retry read-modify-write. The closure may run more
    /// than once and must derive its result only from the value it is given.
    fn transaction(
        &self,
        path: &str,
        update: &mut dyn FnMut(Option<&Value>) -> TransactionOutcome,
    ) -> Result<TransactionResult, SyncError>;

    /// Remove `path` on the server side when this connection drops.
    fn on_disconnect_remove(&self, path: &str) -> Result<(), SyncError>;
}

impl<T: ExternalSync + ?Sized> ExternalSync for std::sync::Arc<T> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    fn get(&self, path: &str) -> Result<Option<Value>, SyncError> {
        (**self).get(path)
    }
    fn subscribe(&self, path: &str) -> Result<Subscription, SyncError> {
        (**self).subscribe(path)
    }
    fn set(&self, path: &str, value: Value) -> Result<(), SyncError> {
        (**self).set(path, value)
    }
    fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), SyncError> {
        (**self).update(path, fields)
    }
    fn remove(&self, path: &str) -> Result<(), SyncError> {
        (**self).remove(path)
    }
    fn transaction(
        &self,
        path: &str,
        update: &mut dyn FnMut(Option<&Value>) -> TransactionOutcome,
    ) -> Result<TransactionResult, SyncError> {
        (**self).transaction(path, update)
    }
    fn on_disconnect_remove(&self, path: &str) -> Result<(), SyncError> {
        (**self).on_disconnect_remove(path)
    }
}

// ---------------------------------------------------------------------------
// Record codec
// ---------------------------------------------------------------------------

/// Decode a store value into a typed record. Malformed payloads are logged
/// and treated as absent rather than trusted.
pub fn decode_record<T: DeserializeOwned>(path: &str, value: Option<&Value>) -> Option<T> {
    let value = value?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value.clone()) {
        Ok(record) => Some(record),
        Err(err) => {
            warn!(path, error = %err, "discarding malformed record");
            None
        }
    }
}

pub fn encode_record<T: Serialize>(record: &T) -> GameResult<Value> {
    Ok(serde_json::to_value(record)?)
}

/// Test double whose transactions on `/global` fail while `locked` is set.
#[cfg(test)]
pub(crate) struct GlobalLock {
    pub conn: MemoryConnection,
    pub locked: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl GlobalLock {
    pub fn new(conn: MemoryConnection, locked: bool) -> Self {
        Self { conn, locked: std::sync::atomic::AtomicBool::new(locked) }
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl ExternalSync for GlobalLock {
    fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }
    fn get(&self, path: &str) -> Result<Option<Value>, SyncError> {
        self.conn.get(path)
    }
    fn subscribe(&self, path: &str) -> Result<Subscription, SyncError> {
        self.conn.subscribe(path)
    }
    fn set(&self, path: &str, value: Value) -> Result<(), SyncError> {
        self.conn.set(path, value)
    }
    fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), SyncError> {
        self.conn.update(path, fields)
    }
    fn remove(&self, path: &str) -> Result<(), SyncError> {
        self.conn.remove(path)
    }
    fn transaction(
        &self,
        path: &str,
        update: &mut dyn FnMut(Option<&Value>) -> TransactionOutcome,
    ) -> Result<TransactionResult, SyncError> {
        if path == paths::GLOBAL && self.locked.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SyncError::Offline);
        }
        self.conn.transaction(path, update)
    }
    fn on_disconnect_remove(&self, path: &str) -> Result<(), SyncError> {
        self.conn.on_disconnect_remove(path)
    }
}
