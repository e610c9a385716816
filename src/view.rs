//! Incremental view builder — a render-ready projection of the store.
//!
//! DESIGN
//! ======
//! `BoardView` is a derived, disposable projection (ordered sequence plus
//! id→index map) that is always reconstructible from the store and never
//! authoritative. Ordering is by object id: the criterion is stable under
//! field mutation, which is what lets the common update pattern (drag or
//! resize of existing objects) overwrite in place at O(1) per changed id
//! with no reordering. `z_index` stays a paint-order hint for renderers.
//!
//! Structural changes (ids appearing or disappearing) are the only paths
//! allowed to cost more than O(k): they splice the ordered sequence and
//! reindex the affected suffix. Pure field updates never take them.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::model::BoardObject;
use crate::store::SharedObjectStore;

/// Upper bound on objects exposed to automated/AI consumers.
pub const SCOPED_READ_LIMIT: usize = 50;

// =============================================================================
// BOARD VIEW
// =============================================================================

#[derive(Debug, Default)]
pub struct BoardView {
    ordered: Vec<BoardObject>,
    index: HashMap<String, usize>,
}

impl BoardView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full rebuild from the store. O(n); the cold-load path and the parity
    /// oracle for `apply_changes`.
    #[must_use]
    pub fn rebuild(store: &SharedObjectStore) -> Self {
        let ordered = store.get_all();
        let index = ordered
            .iter()
            .enumerate()
            .map(|(at, object)| (object.id.clone(), at))
            .collect();
        Self { ordered, index }
    }

    /// Bring the view up to date with the store for the given changed ids.
    /// The result is element-for-element identical to `rebuild(store)`.
    pub fn apply_changes(&mut self, store: &SharedObjectStore, changed: &HashSet<String>) {
        let mut removals: Vec<usize> = Vec::new();
        let mut additions: Vec<BoardObject> = Vec::new();

        for id in changed {
            match (self.index.get(id).copied(), store.get(id)) {
                // Known id, still present: overwrite in place, no shifts.
                (Some(at), Some(current)) => self.ordered[at] = current,
                // Known id, gone from the store: drop and compact below.
                (Some(at), None) => removals.push(at),
                // New id: insert at its ordered position below.
                (None, Some(current)) => additions.push(current),
                (None, None) => {}
            }
        }

        if removals.is_empty() && additions.is_empty() {
            return;
        }

        let mut first_affected = usize::MAX;

        // Descending order keeps the collected positions valid as we splice.
        removals.sort_unstable_by(|a, b| b.cmp(a));
        for at in removals {
            let gone = self.ordered.remove(at);
            self.index.remove(&gone.id);
            first_affected = first_affected.min(at);
        }

        additions.sort_by(|a, b| a.id.cmp(&b.id));
        for object in additions {
            let at = self.ordered.partition_point(|o| o.id < object.id);
            self.ordered.insert(at, object);
            first_affected = first_affected.min(at);
        }

        // Compact indices for everything at or after the first splice point
        // so lookups remain valid.
        for at in first_affected..self.ordered.len() {
            self.index.insert(self.ordered[at].id.clone(), at);
        }
    }

    #[must_use]
    pub fn objects(&self) -> &[BoardObject] {
        &self.ordered
    }

    #[must_use]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Bounded read for automated/AI consumers: at most `limit` objects
    /// (out-of-range limits are normalized to [`SCOPED_READ_LIMIT`]), paired
    /// with the true count so truncation is detectable downstream.
    #[must_use]
    pub fn scoped(&self, limit: usize) -> ScopedView {
        let cap = if limit == 0 || limit > SCOPED_READ_LIMIT {
            SCOPED_READ_LIMIT
        } else {
            limit
        };
        let objects: Vec<BoardObject> = self.ordered.iter().take(cap).cloned().collect();
        ScopedView {
            total_objects: self.ordered.len(),
            returned_count: objects.len(),
            objects,
        }
    }
}

// =============================================================================
// SCOPED VIEW
// =============================================================================

/// Truncation-aware reply shape for the bounded read contract.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedView {
    pub objects: Vec<BoardObject>,
    pub total_objects: usize,
    pub returned_count: usize,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "view_test.rs"]
mod tests;
