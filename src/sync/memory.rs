// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - In-memory realtime store
//
// A path tree of JSON values shared by any number of connections. Mirrors
// the hosted store's contract: null and empty objects are never stored,
// listeners get the current value on subscribe and on every change,
// transactions are optimistic (compare the value read before running the
// closure, retry on mismatch) and disconnect hooks run when a connection
// drops.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info};

use super::paths::segments;
use super::{ExternalSync, Subscription, TransactionOutcome, TransactionResult};
use crate::error::SyncError;

/// Attempts before a transaction reports contention.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;

// ─── Store ───────────────────────────────────────────────────────────────────

pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    max_attempts: u32,
}

struct StoreInner {
    root: Value,
    watchers: Vec<Watcher>,
    connections: HashMap<u64, ConnectionState>,
    next_connection: u64,
}

#[derive(Default)]
struct ConnectionState {
    online: bool,
    disconnect_removals: Vec<String>,
}

struct Watcher {
    connection: u64,
    path: String,
    sender: UnboundedSender<Option<Value>>,
    last_sent: Option<Option<Value>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                root: Value::Object(Map::new()),
                watchers: Vec::new(),
                connections: HashMap::new(),
                next_connection: 1,
            }),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Open a new client connection.
    pub fn connect(self: &Arc<Self>) -> MemoryConnection {
        let mut inner = self.inner.lock();
        let id = inner.next_connection;
        inner.next_connection += 1;
        inner.connections.insert(id, ConnectionState { online: true, ..Default::default() });
        debug!(connection = id, "store connection opened");
        MemoryConnection { store: Arc::clone(self), id }
    }

    /// Server-side read, independent of any connection.
    pub fn snapshot(&self, path: &str) -> Option<Value> {
        self.inner.lock().read(path).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.values().filter(|c| c.online).count()
    }

    fn drop_connection(&self, id: u64) {
        let mut inner = self.inner.lock();
        let removals = match inner.connections.get_mut(&id) {
            Some(conn) if conn.online => {
                conn.online = false;
                std::mem::take(&mut conn.disconnect_removals)
            }
            _ => return,
        };
        for path in &removals {
            inner.write(path, Value::Null);
        }
        inner.notify();
        info!(connection = id, cleaned = removals.len(), "store connection dropped");
    }

    fn restore_connection(&self, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.connections.get_mut(&id) {
            conn.online = true;
        }
        // listeners re-fire with the current value after a reconnect
        for watcher in inner.watchers.iter_mut().filter(|w| w.connection == id) {
            watcher.last_sent = None;
        }
        inner.notify();
        info!(connection = id, "store connection restored");
    }
}

impl StoreInner {
    fn is_online(&self, id: u64) -> bool {
        self.connections.get(&id).map_or(false, |c| c.online)
    }

    fn read(&self, path: &str) -> Option<&Value> {
        let mut node = &self.root;
        for seg in segments(path) {
            node = node.as_object()?.get(seg)?;
        }
        Some(node)
    }

    fn write(&mut self, path: &str, value: Value) {
        let segs = segments(path);
        match prune(value) {
            Some(value) => write_at(&mut self.root, &segs, value),
            None => remove_at(&mut self.root, &segs),
        }
        if !self.root.is_object() {
            self.root = Value::Object(Map::new());
        }
    }

    /// Push the current value to every online watcher whose view changed.
    fn notify(&mut self) {
        self.watchers.retain(|w| !w.sender.is_closed());
        let mut pending = Vec::new();
        for (i, watcher) in self.watchers.iter().enumerate() {
            if !self.is_online(watcher.connection) {
                continue;
            }
            let current = self.read(&watcher.path).cloned();
            if watcher.last_sent.as_ref() != Some(&current) {
                pending.push((i, current));
            }
        }
        for (i, current) in pending {
            let watcher = &mut self.watchers[i];
            let _ = watcher.sender.send(current.clone());
            watcher.last_sent = Some(current);
        }
    }
}

/// Strip nulls and empty objects. Returns `None` when nothing remains.
fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let kept: Map<String, Value> =
                map.into_iter().filter_map(|(k, v)| prune(v).map(|v| (k, v))).collect();
            if kept.is_empty() {
                None
            } else {
                Some(Value::Object(kept))
            }
        }
        other => Some(other),
    }
}

fn write_at(node: &mut Value, segs: &[&str], value: Value) {
    let Some((first, rest)) = segs.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        write_at(child, rest, value);
    }
}

fn remove_at(node: &mut Value, segs: &[&str]) {
    let Some((first, rest)) = segs.split_first() else {
        *node = Value::Object(Map::new());
        return;
    };
    if let Value::Object(map) = node {
        if rest.is_empty() {
            map.remove(*first);
            return;
        }
        let now_empty = match map.get_mut(*first) {
            Some(child) => {
                remove_at(child, rest);
                child.as_object().map_or(false, Map::is_empty)
            }
            None => false,
        };
        if now_empty {
            map.remove(*first);
        }
    }
}

// ─── Connection ──────────────────────────────────────────────────────────────

/// One client's handle on a `MemoryStore`. Dropping it counts as a
/// disconnect and runs the registered cleanup.
pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    id: u64,
}

impl MemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Simulate losing the network: server-side cleanup runs and every
    /// operation fails with `Offline` until `go_online`.
    pub fn go_offline(&self) {
        self.store.drop_connection(self.id);
    }

    pub fn go_online(&self) {
        self.store.restore_connection(self.id);
    }

    fn ensure_online(&self) -> Result<(), SyncError> {
        if self.store.inner.lock().is_online(self.id) {
            Ok(())
        } else {
            Err(SyncError::Offline)
        }
    }

    fn mutate(&self, apply: impl FnOnce(&mut StoreInner)) -> Result<(), SyncError> {
        let mut inner = self.store.inner.lock();
        if !inner.is_online(self.id) {
            return Err(SyncError::Offline);
        }
        apply(&mut *inner);
        inner.notify();
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.store.drop_connection(self.id);
        self.store.inner.lock().connections.remove(&self.id);
    }
}

impl ExternalSync for MemoryConnection {
    fn is_connected(&self) -> bool {
        self.ensure_online().is_ok()
    }

    fn get(&self, path: &str) -> Result<Option<Value>, SyncError> {
        let inner = self.store.inner.lock();
        if !inner.is_online(self.id) {
            return Err(SyncError::Offline);
        }
        Ok(inner.read(path).cloned())
    }

    fn subscribe(&self, path: &str) -> Result<Subscription, SyncError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.store.inner.lock();
        if !inner.is_online(self.id) {
            return Err(SyncError::Offline);
        }
        let current = inner.read(path).cloned();
        let _ = sender.send(current.clone());
        inner.watchers.push(Watcher {
            connection: self.id,
            path: path.to_string(),
            sender,
            last_sent: Some(current),
        });
        Ok(Subscription::new(path, receiver))
    }

    fn set(&self, path: &str, value: Value) -> Result<(), SyncError> {
        self.mutate(|inner| inner.write(path, value))
    }

    fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), SyncError> {
        self.mutate(|inner| {
            for (key, value) in fields {
                inner.write(&format!("{path}/{key}"), value);
            }
        })
    }

    fn remove(&self, path: &str) -> Result<(), SyncError> {
        self.mutate(|inner| inner.write(path, Value::Null))
    }

    fn transaction(
        &self,
        path: &str,
        update: &mut dyn FnMut(Option<&Value>) -> TransactionOutcome,
    ) -> Result<TransactionResult, SyncError> {
        for attempt in 1..=self.store.max_attempts {
            let seen = {
                let inner = self.store.inner.lock();
                if !inner.is_online(self.id) {
                    return Err(SyncError::Offline);
                }
                inner.read(path).cloned()
            };

            // the closure runs unlocked, so other writers may interleave
            let outcome = update(seen.as_ref());

            let mut inner = self.store.inner.lock();
            if !inner.is_online(self.id) {
                return Err(SyncError::Offline);
            }
            if inner.read(path) != seen.as_ref() {
                debug!(path, attempt, "transaction lost a race, retrying");
                continue;
            }
            return match outcome {
                TransactionOutcome::Abort => {
                    Ok(TransactionResult { committed: false, snapshot: seen })
                }
                TransactionOutcome::Commit(value) => {
                    inner.write(path, value);
                    inner.notify();
                    Ok(TransactionResult { committed: true, snapshot: inner.read(path).cloned() })
                }
            };
        }
        Err(SyncError::Contention { path: path.to_string(), attempts: self.store.max_attempts })
    }

    fn on_disconnect_remove(&self, path: &str) -> Result<(), SyncError> {
        let mut inner = self.store.inner.lock();
        match inner.connections.get_mut(&self.id) {
            Some(conn) if conn.online => {
                if !conn.disconnect_removals.iter().any(|p| p == path) {
                    conn.disconnect_removals.push(path.to_string());
                }
                Ok(())
            }
            _ => Err(SyncError::Offline),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_set_get_and_prune() {
        let store = MemoryStore::shared();
        let conn = store.connect();

        conn.set("game/currentRound", json!({ "active": true, "choices": {} })).unwrap();
        assert_eq!(conn.get("game/currentRound").unwrap(), Some(json!({ "active": true })));

        conn.remove("game/currentRound").unwrap();
        assert_eq!(conn.get("game/currentRound").unwrap(), None);
        // empty parent is pruned as well
        assert_eq!(conn.get("game").unwrap(), None);
    }

    #[test]
    fn test_update_merges_and_null_removes() {
        let store = MemoryStore::shared();
        let conn = store.connect();
        conn.set("players/p1", json!({ "name": "Pioneer_3", "lastActive": 1 })).unwrap();

        conn.update("players/p1", fields(json!({ "lastActive": 9, "color": "#FFD166" }))).unwrap();
        assert_eq!(
            conn.get("players/p1").unwrap(),
            Some(json!({ "name": "Pioneer_3", "lastActive": 9, "color": "#FFD166" }))
        );

        conn.update("players/p1", fields(json!({ "color": null }))).unwrap();
        assert!(conn.get("players/p1/color").unwrap().is_none());
    }

    #[test]
    fn test_subscription_replays_then_streams() {
        let store = MemoryStore::shared();
        let writer = store.connect();
        let reader = store.connect();
        writer.set("global", json!({ "eco": 10 })).unwrap();

        let mut sub = reader.subscribe("global").unwrap();
        assert_eq!(sub.try_next(), Some(Some(json!({ "eco": 10 }))));
        assert_eq!(sub.try_next(), None);

        writer.set("global/eco", json!(11)).unwrap();
        // unrelated writes do not wake the listener
        writer.set("players/p1", json!({ "name": "x" })).unwrap();
        assert_eq!(sub.try_next(), Some(Some(json!({ "eco": 11 }))));
        assert_eq!(sub.try_next(), None);

        writer.remove("global").unwrap();
        assert_eq!(sub.latest(), Some(None));
    }

    #[test]
    fn test_transaction_commit_and_abort() {
        let store = MemoryStore::shared();
        let conn = store.connect();

        let result = conn
            .transaction("counter", &mut |current| {
                let n = current.and_then(Value::as_i64).unwrap_or(0);
                TransactionOutcome::Commit(json!(n + 1))
            })
            .unwrap();
        assert!(result.committed);
        assert_eq!(result.snapshot, Some(json!(1)));

        let result = conn.transaction("counter", &mut |_| TransactionOutcome::Abort).unwrap();
        assert!(!result.committed);
        assert_eq!(result.snapshot, Some(json!(1)));
    }

    #[test]
    fn test_transaction_retries_after_interleaved_write() {
        let store = MemoryStore::shared();
        let a = store.connect();
        let b = store.connect();
        a.set("counter", json!(0)).unwrap();

        let mut runs = 0;
        let result = a
            .transaction("counter", &mut |current| {
                runs += 1;
                if runs == 1 {
                    // another client sneaks in between read and commit
                    b.set("counter", json!(10)).unwrap();
                }
                let n = current.and_then(Value::as_i64).unwrap_or(0);
                TransactionOutcome::Commit(json!(n + 1))
            })
            .unwrap();

        assert_eq!(runs, 2);
        assert!(result.committed);
        assert_eq!(store.snapshot("counter"), Some(json!(11)));
    }

    #[test]
    fn test_transaction_gives_up_under_constant_contention() {
        let store = Arc::new(MemoryStore::with_max_attempts(3));
        let a = store.connect();
        let b = store.connect();
        let mut n = 0;
        let err = a
            .transaction("hot", &mut |_| {
                n += 1;
                b.set("hot", json!(n)).unwrap();
                TransactionOutcome::Commit(json!(-1))
            })
            .unwrap_err();
        assert_eq!(err, SyncError::Contention { path: "hot".into(), attempts: 3 });
    }

    #[test]
    fn test_offline_connection_rejects_and_runs_cleanup() {
        let store = MemoryStore::shared();
        let player = store.connect();
        let observer = store.connect();

        player.set("players/p1", json!({ "name": "Steward_1" })).unwrap();
        player.on_disconnect_remove("players/p1").unwrap();
        let mut sub = observer.subscribe("players").unwrap();
        sub.latest();

        player.go_offline();
        assert!(!player.is_connected());
        assert_eq!(player.get("players").unwrap_err(), SyncError::Offline);
        assert_eq!(player.set("x", json!(1)).unwrap_err(), SyncError::Offline);
        assert_eq!(sub.latest(), Some(None));
        assert_eq!(store.connection_count(), 1);

        player.go_online();
        assert!(player.is_connected());
        // cleanup hooks are one-shot
        player.set("players/p1", json!({ "name": "Steward_1" })).unwrap();
        player.go_offline();
        player.go_online();
        assert!(store.snapshot("players/p1").is_some());
    }

    #[test]
    fn test_reconnect_refires_listeners() {
        let store = MemoryStore::shared();
        let conn = store.connect();
        conn.set("global", json!({ "eco": 3 })).unwrap();
        let mut sub = conn.subscribe("global").unwrap();
        sub.latest();

        conn.go_offline();
        conn.go_online();
        assert_eq!(sub.latest(), Some(Some(json!({ "eco": 3 }))));
    }

    #[test]
    fn test_dropping_connection_counts_as_disconnect() {
        let store = MemoryStore::shared();
        {
            let conn = store.connect();
            conn.set("players/p9", json!({ "name": "Catalyst_9" })).unwrap();
            conn.on_disconnect_remove("players/p9").unwrap();
        }
        assert!(store.snapshot("players/p9").is_none());
        assert_eq!(store.connection_count(), 0);
    }
}
