//! Per-tile attempt accounting for one viewport session.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::coord::TileIndex;

/// Tracks how often each tile has been attempted within the current
/// viewport session and decides when a tile is no longer worth trying.
///
/// Callers check [`reached_max`](Self::reached_max) *before* recording an
/// attempt, so with the default `max_retries` of 0 a tile gets exactly two
/// attempts: the counter is still 0 during the second check and only the
/// third finds it above the threshold.
///
/// Not synchronized; the fetch engine owns the only instance and keeps it
/// behind its own lock.
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: HashMap<TileIndex, u32>,
    max_retries: u32,
}

impl RetryTracker {
    /// Tracker allowing one retry per tile (two attempts total).
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker allowing `max_retries` retries after the initial attempt.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            attempts: HashMap::new(),
            max_retries,
        }
    }

    /// Whether this tile has used up its attempts for the session.
    pub fn reached_max(&self, index: &TileIndex) -> bool {
        self.attempts.get(index).copied().unwrap_or(0) > self.max_retries
    }

    /// Record one attempt for this tile.
    pub fn record_attempt(&mut self, index: &TileIndex) {
        match self.attempts.entry(index.clone()) {
            Entry::Occupied(mut entry) => *entry.get_mut() += 1,
            Entry::Vacant(entry) => {
                entry.insert(0);
            }
        }
    }

    /// Forget all attempts. Called exactly once at the start of each new
    /// viewport session, never mid-session.
    pub fn clear(&mut self) {
        self.attempts.clear();
    }
}
