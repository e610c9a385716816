//! Presence pipeline — bounded latest-wins queue plus flush throttle.
//!
//! DESIGN
//! ======
//! Presence is ephemeral: never persisted, never replicated, excluded from
//! history. A `PresenceQueue` keeps the single most recent event per user
//! under a capacity bound with insertion-order eviction. A `PresenceThrottle`
//! gates how often accumulated presence state is flushed outward: calls
//! inside the cooldown are dropped outright, not queued or delayed.
//!
//! Both types are infallible; out-of-range configuration is normalized to a
//! safe default rather than rejected.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Fallback queue bound when the caller passes a zero capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Fallback flush interval when the caller passes a zero duration.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 50;

// =============================================================================
// PRESENCE EVENT
// =============================================================================

/// One user's cursor state. Uniqueness key is `user_id`; a newer event for
/// the same user always replaces the prior one, never merges fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub user_id: String,
    pub user_name: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<i64>,
}

// =============================================================================
// PRESENCE QUEUE
// =============================================================================

/// Bounded mapping from user id to that user's most recent event.
#[derive(Debug, Default)]
pub struct PresenceQueue {
    entries: HashMap<String, PresenceEvent>,
    /// Distinct users in insertion order. Refreshing an existing user does
    /// not move it — eviction is FIFO over first insertion, not LRU.
    arrival: VecDeque<String>,
}

impl PresenceQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` as the latest for its user. Replacing an existing
    /// user's entry never changes queue size and never evicts. A new user at
    /// or above capacity evicts exactly one entry: the one present longest
    /// without being refreshed. `max_size == 0` falls back to
    /// [`DEFAULT_QUEUE_CAPACITY`].
    pub fn enqueue(&mut self, event: PresenceEvent, max_size: usize) {
        let cap = if max_size == 0 { DEFAULT_QUEUE_CAPACITY } else { max_size };

        if self.entries.contains_key(&event.user_id) {
            self.entries.insert(event.user_id.clone(), event);
            return;
        }

        while self.entries.len() >= cap {
            let Some(oldest) = self.arrival.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }

        self.arrival.push_back(event.user_id.clone());
        self.entries.insert(event.user_id.clone(), event);
    }

    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&PresenceEvent> {
        self.entries.get(user_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current events in arrival order, for broadcast payloads.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PresenceEvent> {
        self.arrival
            .iter()
            .filter_map(|user_id| self.entries.get(user_id).cloned())
            .collect()
    }
}

// =============================================================================
// PRESENCE THROTTLE
// =============================================================================

/// Rate limit on outbound presence flushes. The first call after
/// construction fires immediately; calls strictly inside the cooldown are
/// dropped; a call at or after `last_fired + interval` fires and resets the
/// window.
#[derive(Debug)]
pub struct PresenceThrottle {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl PresenceThrottle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS)
        } else {
            interval
        };
        Self { interval, last_fired: None }
    }

    /// Run `action` if outside the cooldown. Returns whether it fired.
    pub fn fire<F: FnOnce()>(&mut self, action: F) -> bool {
        self.fire_at(Instant::now(), action)
    }

    /// Internal: fire with an explicit clock (for deterministic tests).
    fn fire_at<F: FnOnce()>(&mut self, now: Instant, action: F) -> bool {
        if let Some(last) = self.last_fired {
            if now.duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_fired = Some(now);
        action();
        true
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
