//! Store view used by scheduling
//!
//! A [`StoreInfo`] combines the durable meta, the last heartbeat status
//! block and counters derived from the region cache (leader/region counts
//! and sizes). Callers always get clones; only the cache mutates these.

use crate::models::{StoreMeta, StoreState, StoreStats};
use placement_core::STORE_DISCONNECT_DURATION;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Scheduling view of a store
#[derive(Debug, Clone, PartialEq)]
pub struct StoreInfo {
    pub meta: StoreMeta,
    pub stats: StoreStats,
    /// When the last store heartbeat arrived
    pub last_heartbeat: Option<Instant>,
    /// Regions led by this store, from the region cache
    pub leader_count: usize,
    /// Regions with any peer on this store, from the region cache
    pub region_count: usize,
    /// Peers on this store still catching up
    pub pending_peer_count: usize,
    /// Approximate size of led regions (MB)
    pub leader_size: u64,
    /// Approximate size of all regions on this store (MB)
    pub region_size: u64,
}

impl StoreInfo {
    pub fn new(meta: StoreMeta) -> Self {
        let stats = StoreStats {
            store_id: meta.id,
            ..Default::default()
        };
        Self {
            meta,
            stats,
            last_heartbeat: None,
            leader_count: 0,
            region_count: 0,
            pending_peer_count: 0,
            leader_size: 0,
            region_size: 0,
        }
    }

    pub fn with_stats(mut self, stats: StoreStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_last_heartbeat(mut self, at: Instant) -> Self {
        self.last_heartbeat = Some(at);
        self
    }

    pub fn with_leader_count(mut self, count: usize) -> Self {
        self.leader_count = count;
        self
    }

    pub fn with_region_count(mut self, count: usize) -> Self {
        self.region_count = count;
        self
    }

    pub fn with_state(mut self, state: StoreState) -> Self {
        self.meta.state = state;
        self
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn state(&self) -> StoreState {
        self.meta.state
    }

    pub fn is_up(&self) -> bool {
        self.meta.state == StoreState::Up
    }

    pub fn is_offline(&self) -> bool {
        self.meta.state == StoreState::Offline
    }

    pub fn is_tombstone(&self) -> bool {
        self.meta.state == StoreState::Tombstone
    }

    /// Value of a location label
    pub fn label(&self, key: &str) -> Option<&str> {
        self.meta.label(key)
    }

    /// Time since the last heartbeat; unbounded if none was ever seen
    pub fn down_time(&self, now: Instant) -> Duration {
        match self.last_heartbeat {
            Some(at) => now.saturating_duration_since(at),
            None => Duration::MAX,
        }
    }

    pub fn is_disconnected(&self, now: Instant) -> bool {
        self.down_time(now) > STORE_DISCONNECT_DURATION
    }

    pub fn is_down(&self, now: Instant, max_down_time: Duration) -> bool {
        self.down_time(now) > max_down_time
    }

    pub fn is_busy(&self) -> bool {
        self.stats.is_busy
    }

    /// Bytes in use
    pub fn used_size(&self) -> u64 {
        self.stats.capacity.saturating_sub(self.stats.available)
    }

    /// Fraction of capacity in use (0.0 - 1.0)
    pub fn storage_ratio(&self) -> f64 {
        if self.stats.capacity == 0 {
            0.0
        } else {
            self.used_size() as f64 / self.stats.capacity as f64
        }
    }

    /// Fraction of capacity still free (0.0 - 1.0)
    pub fn available_ratio(&self) -> f64 {
        if self.stats.capacity == 0 {
            0.0
        } else {
            self.stats.available as f64 / self.stats.capacity as f64
        }
    }

    /// Used ratio above `low_space_ratio`
    pub fn is_low_space(&self, low_space_ratio: f64) -> bool {
        self.stats.capacity > 0 && self.storage_ratio() > low_space_ratio
    }

    /// Snapshots in flight in any direction
    pub fn snapshot_count(&self) -> u64 {
        self.stats.sending_snap_count
            + self.stats.receiving_snap_count
            + self.stats.applying_snap_count
    }
}

/// Store table keyed by id
#[derive(Debug, Default, Clone)]
pub struct StoresInfo {
    stores: BTreeMap<u64, StoreInfo>,
}

impl StoresInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<&StoreInfo> {
        self.stores.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut StoreInfo> {
        self.stores.get_mut(&id)
    }

    /// Insert or replace
    pub fn put(&mut self, store: StoreInfo) {
        self.stores.insert(store.id(), store);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoreInfo> {
        self.stores.values()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoreLabel;

    fn make_store(capacity: u64, available: u64) -> StoreInfo {
        let meta = StoreMeta {
            id: 1,
            address: "s1:20160".into(),
            labels: vec![StoreLabel::new("zone", "z1")],
            state: StoreState::Up,
        };
        StoreInfo::new(meta).with_stats(StoreStats {
            store_id: 1,
            capacity,
            available,
            ..Default::default()
        })
    }

    #[test]
    fn test_storage_ratio() {
        let store = make_store(100, 25);
        assert!((store.storage_ratio() - 0.75).abs() < f64::EPSILON);
        assert!((store.available_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(store.used_size(), 75);
        assert!(store.is_low_space(0.7));
        assert!(!store.is_low_space(0.8));
    }

    #[test]
    fn test_zero_capacity() {
        let store = make_store(0, 0);
        assert_eq!(store.storage_ratio(), 0.0);
        assert!(!store.is_low_space(0.1));
    }

    #[test]
    fn test_down_time() {
        let now = Instant::now();
        let store = make_store(100, 50);
        assert_eq!(store.down_time(now), Duration::MAX);
        assert!(store.is_disconnected(now));

        let store = store.with_last_heartbeat(now);
        let later = now + Duration::from_secs(30);
        assert_eq!(store.down_time(later), Duration::from_secs(30));
        assert!(store.is_disconnected(later));
        assert!(!store.is_down(later, Duration::from_secs(60)));
        assert!(store.is_down(later, Duration::from_secs(10)));
    }

    #[test]
    fn test_stores_info_put_replaces() {
        let mut stores = StoresInfo::new();
        stores.put(make_store(100, 50));
        stores.put(make_store(100, 10).with_leader_count(4));
        assert_eq!(stores.len(), 1);
        assert_eq!(stores.get(1).unwrap().leader_count, 4);
    }
}
