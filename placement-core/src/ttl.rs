//! Short-lived id markers
//!
//! Used for the balancer skip cache and the merge checker's
//! recently-split markers. Expired entries are invisible immediately and
//! physically dropped by [`TtlCache::gc`].

use crate::clock::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Set of ids with per-entry expiry
#[derive(Debug)]
pub struct TtlCache {
    name: &'static str,
    entries: Mutex<HashMap<u64, Instant>>,
    clock: Arc<dyn Clock>,
}

impl TtlCache {
    /// Create an empty cache
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Insert or refresh an id
    pub fn put(&self, id: u64, ttl: Duration) {
        let deadline = self.clock.now() + ttl;
        self.entries.lock().insert(id, deadline);
    }

    /// Whether the id is present and not expired
    pub fn contains(&self, id: u64) -> bool {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(&id)
            .map(|deadline| *deadline > now)
            .unwrap_or(false)
    }

    /// Drop an id
    pub fn remove(&self, id: u64) {
        self.entries.lock().remove(&id);
    }

    /// Live ids
    pub fn ids(&self) -> Vec<u64> {
        let now = self.clock.now();
        let mut ids: Vec<u64> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, deadline)| **deadline > now)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of entries, expired ones included until the next gc
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries, returning how many were removed
    pub fn gc(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, deadline| *deadline > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(cache = self.name, removed, "Expired ttl entries collected");
        }
        removed
    }
}
