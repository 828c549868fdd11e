//! Shared fixture for scheduler integration tests

#![allow(dead_code)]

use placement_core::{IdAllocator, ManualClock, MemoryIdAllocator};
use placement_metadata::{
    ClusterInfo, ClusterMeta, Peer, RegionEpoch, RegionInfo, RegionMeta, StoreLabel, StoreMeta,
    StoreStats,
};
use placement_scheduler::{Coordinator, DefaultClassifier, PlacementConfig};
use std::sync::Arc;
use std::time::Duration;

/// Store capacity used by every fixture store
pub const CAPACITY: u64 = 100;

pub struct TestCluster {
    pub cluster: Arc<ClusterInfo>,
    pub clock: Arc<ManualClock>,
    used: parking_lot::Mutex<std::collections::HashMap<u64, u64>>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::with_id_allocator(Arc::new(MemoryIdAllocator::new(10_000)))
    }

    pub fn with_id_allocator(id_alloc: Arc<dyn IdAllocator>) -> Self {
        let clock = ManualClock::shared();
        let cluster = ClusterInfo::new(ClusterMeta::default(), id_alloc, clock.clone());
        Self {
            cluster: Arc::new(cluster),
            clock,
            used: parking_lot::Mutex::new(Default::default()),
        }
    }

    /// Up store with `labels`, `used` out of [`CAPACITY`] in use
    pub fn add_store(&self, id: u64, labels: &[(&str, &str)], used: u64) {
        self.cluster
            .put_store(StoreMeta {
                id,
                address: format!("store-{id}:20160"),
                labels: labels.iter().map(|(k, v)| StoreLabel::new(*k, *v)).collect(),
                ..Default::default()
            })
            .unwrap();
        self.used.lock().insert(id, used);
        self.heartbeat_store(id);
    }

    pub fn heartbeat_store(&self, id: u64) {
        let used = self.used.lock().get(&id).copied().unwrap_or(0);
        self.cluster
            .handle_store_heartbeat(StoreStats {
                store_id: id,
                capacity: CAPACITY,
                available: CAPACITY - used,
                ..Default::default()
            })
            .unwrap();
    }

    /// Advance the clock, keeping every store but `silent` alive
    pub fn advance(&self, by: Duration, silent: &[u64]) {
        self.clock.advance(by);
        let ids: Vec<u64> = self.used.lock().keys().copied().collect();
        for id in ids {
            if !silent.contains(&id) {
                self.heartbeat_store(id);
            }
        }
    }

    /// Region `id` spanning its own key slot, led by the first store
    pub fn region(&self, id: u64, stores: &[u64]) -> RegionInfo {
        region_with_keys(id, &key(id), &key(id + 1), stores)
    }

    /// Build and cache region `id`
    pub fn put_region(&self, id: u64, stores: &[u64]) -> RegionInfo {
        let region = self.region(id, stores);
        self.cluster.put_region(region.clone());
        region
    }

    pub fn coordinator(&self, config: PlacementConfig) -> Arc<Coordinator> {
        Arc::new(Coordinator::new(
            self.cluster.clone(),
            Arc::new(config),
            Arc::new(DefaultClassifier),
        ))
    }
}

pub fn key(id: u64) -> Vec<u8> {
    format!("k{id:06}").into_bytes()
}

/// Region led by the peer on `stores[0]`; peer ids are `id * 10 + store`
pub fn region_with_keys(id: u64, start: &[u8], end: &[u8], stores: &[u64]) -> RegionInfo {
    let peers: Vec<Peer> = stores.iter().map(|s| Peer::new(id * 10 + s, *s)).collect();
    RegionInfo::new(
        RegionMeta {
            id,
            start_key: start.to_vec(),
            end_key: end.to_vec(),
            epoch: RegionEpoch::new(1, 1),
            peers: peers.clone(),
        },
        peers.first().copied(),
    )
}
