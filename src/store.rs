//! Shared object store — typed CRUD over a conflict-free replicated map.
//!
//! DESIGN
//! ======
//! Each board replica wraps a `yrs::Doc` holding one named map, `"objects"`,
//! keyed by object id with whole-record JSON values. One compound value per
//! key means the replicated map resolves concurrent writes per record: two
//! editors changing different fields of the same object do NOT both survive,
//! whichever write the map's causal order places later replaces the other
//! entirely. That semantic is deliberate and must not be "fixed" into
//! per-field merging.
//!
//! Change notification: a map observer collects touched keys per committed
//! transaction; every mutating operation then dispatches the drained
//! changed-id set synchronously to subscribers. Dispatch is single-threaded
//! and non-reentrant — handlers must not call back into the store.
//!
//! ERROR HANDLING
//! ==============
//! Snapshot hydration never fails: any input that cannot be decoded yields an
//! empty store. The store does not distinguish "empty" from "failed to
//! parse"; callers that care carry that distinction upstream.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use yrs::updates::decoder::Decode;
use yrs::{Any, Doc, Map, MapRef, Observable, Out, ReadTxn, StateVector, Subscription, Transact, Update};

use crate::model::BoardObject;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("malformed update payload: {0}")]
    MalformedUpdate(String),
    #[error("object encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedUpdate(_) => "E_MALFORMED_UPDATE",
            Self::Encode(_) => "E_ENCODE",
        }
    }
}

/// Handle returned by [`SharedObjectStore::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ChangeHandler = Box<dyn FnMut(&HashSet<String>) + Send + Sync + 'static>;

/// One replica's canonical object set.
pub struct SharedObjectStore {
    doc: Doc,
    objects: MapRef,
    /// Keys touched by the currently committing transaction. Filled by the
    /// map observer, drained by `notify` after each mutating operation.
    pending: Arc<Mutex<HashSet<String>>>,
    subscribers: Vec<(SubscriptionId, ChangeHandler)>,
    next_subscription: u64,
    _observer: Subscription,
}

impl SharedObjectStore {
    #[must_use]
    pub fn new() -> Self {
        let doc = Doc::new();
        let objects = doc.get_or_insert_map("objects");
        let pending: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let observer = {
            let pending = Arc::clone(&pending);
            objects.observe(move |txn, event| {
                let mut keys = pending.lock().unwrap_or_else(PoisonError::into_inner);
                for key in event.keys(txn).keys() {
                    keys.insert(key.to_string());
                }
            })
        };

        Self {
            doc,
            objects,
            pending,
            subscribers: Vec::new(),
            next_subscription: 0,
            _observer: observer,
        }
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    /// Insert `object` keyed by its id, entirely replacing any previous value
    /// under that id. Returns the encoded update delta for broadcast.
    ///
    /// # Errors
    ///
    /// Returns `Encode` if the object cannot be serialized (unreachable for
    /// well-typed objects).
    pub fn add(&mut self, object: &BoardObject) -> Result<Vec<u8>, StoreError> {
        let json = serde_json::to_string(object)?;
        let update = {
            let mut txn = self.doc.transact_mut();
            self.objects.insert(&mut txn, object.id.clone(), json);
            txn.encode_update_v1()
        };
        self.notify();
        Ok(update)
    }

    /// Fetch one object. Absent ids and values that fail to parse both read
    /// as `None`; this never errors.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<BoardObject> {
        let txn = self.doc.transact();
        self.objects.get(&txn, id).and_then(decode_value)
    }

    /// Whole-record replace of the value under `id`. The caller supplies the
    /// complete desired object; partial field merging, if any, happened
    /// before this layer. Absent ids are a no-op (`Ok(None)`) — update never
    /// creates.
    ///
    /// # Errors
    ///
    /// Returns `Encode` if the replacement cannot be serialized.
    pub fn update(&mut self, id: &str, replacement: &BoardObject) -> Result<Option<Vec<u8>>, StoreError> {
        if self.get(id).is_none() {
            return Ok(None);
        }
        let json = serde_json::to_string(replacement)?;
        let update = {
            let mut txn = self.doc.transact_mut();
            self.objects.insert(&mut txn, id.to_string(), json);
            txn.encode_update_v1()
        };
        self.notify();
        Ok(Some(update))
    }

    /// Materialize every object, ordered by id. O(n); used for cold loads,
    /// full view rebuilds, and parity checks.
    #[must_use]
    pub fn get_all(&self) -> Vec<BoardObject> {
        let txn = self.doc.transact();
        let keys: Vec<String> = self.objects.keys(&txn).map(|k| k.to_string()).collect();
        let mut objects: Vec<BoardObject> = keys
            .iter()
            .filter_map(|key| self.objects.get(&txn, key).and_then(decode_value))
            .collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        objects
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let txn = self.doc.transact();
        self.objects.len(&txn) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // CHANGE NOTIFICATION
    // =========================================================================

    /// Register a handler invoked synchronously, once per local or remote
    /// mutation, with the set of changed ids. Handlers run on the mutating
    /// call stack and must not re-enter the store.
    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&HashSet<String>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(handler)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    // =========================================================================
    // REPLICATION
    // =========================================================================

    /// Merge a remote update delta and return the set of changed ids.
    /// Applying the same updates in any order, any number of times, converges.
    ///
    /// # Errors
    ///
    /// Returns `MalformedUpdate` if the payload is not a decodable v1 update.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<HashSet<String>, StoreError> {
        let decoded = Update::decode_v1(update).map_err(|e| StoreError::MalformedUpdate(e.to_string()))?;
        {
            let mut txn = self.doc.transact_mut();
            txn.apply_update(decoded)
                .map_err(|e| StoreError::MalformedUpdate(e.to_string()))?;
        }
        Ok(self.notify())
    }

    /// Encode full state as an opaque v1 update byte buffer.
    #[must_use]
    pub fn encode_snapshot(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Build a store from snapshot bytes. Accepts hex-prefixed text (`0x…` or
    /// `\x…`), base64 text, or raw binary. Never fails: undecodable input
    /// yields an empty store.
    #[must_use]
    pub fn from_snapshot(bytes: &[u8]) -> Self {
        for candidate in snapshot_candidates(bytes) {
            let Ok(update) = Update::decode_v1(&candidate) else {
                continue;
            };
            let store = Self::new();
            let applied = {
                let mut txn = store.doc.transact_mut();
                txn.apply_update(update).is_ok()
            };
            if applied {
                // Hydration is not a mutation; drop the observer residue so
                // the first real change set is clean.
                store.clear_pending();
                return store;
            }
        }
        Self::new()
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    /// Drain the keys collected by the observer and dispatch them to every
    /// subscriber. Returns the changed-id set.
    fn notify(&mut self) -> HashSet<String> {
        let changed = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pending)
        };
        if changed.is_empty() {
            return changed;
        }
        for (_, handler) in &mut self.subscribers {
            handler(&changed);
        }
        changed
    }

    fn clear_pending(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for SharedObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn decode_value(value: Out) -> Option<BoardObject> {
    match value {
        Out::Any(Any::String(json)) => serde_json::from_str(&json).ok(),
        _ => None,
    }
}

/// Candidate byte interpretations for snapshot input, most specific first.
/// The raw form is always last so text decodes that happen to succeed but
/// don't contain a valid update fall through to it.
fn snapshot_candidates(raw: &[u8]) -> Vec<Vec<u8>> {
    let mut candidates = Vec::new();
    if let Ok(text) = std::str::from_utf8(raw) {
        let trimmed = text.trim();
        if let Some(digits) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix(r"\x")) {
            if let Ok(bytes) = hex::decode(digits) {
                candidates.push(bytes);
            }
        } else if !trimmed.is_empty() {
            if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(trimmed) {
                candidates.push(bytes);
            }
        }
    }
    candidates.push(raw.to_vec());
    candidates
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
