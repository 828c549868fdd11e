//! Topology cache
//!
//! [`ClusterInfo`] is the scheduler's view of the cluster. It holds stores,
//! regions, the per-store leader/follower index and hot-region stats under
//! a single read/write lock. Every read hands out clones so callers never
//! alias cache-owned memory.
//!
//! Persistence is best-effort: the in-memory cache is updated first, then
//! the change is written through [`MetaStorage`] after the lock is released.
//! A failed write is logged and retried implicitly by the next heartbeat
//! that changes the same region.

use crate::hot::{HotCache, HotThresholds};
use crate::metrics;
use crate::models::{Peer, RegionMeta, StoreMeta, StoreState, StoreStats};
use crate::region::{RegionInfo, RegionsInfo};
use crate::storage::{MemoryStorage, MetaStorage};
use crate::store::{StoreInfo, StoresInfo};
use parking_lot::RwLock;
use placement_core::{Clock, IdAllocator, PlacementError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Cluster-wide policy recorded at bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterMeta {
    pub id: u64,
    /// Replica count each region should converge to
    pub max_peer_count: usize,
}

impl Default for ClusterMeta {
    fn default() -> Self {
        Self {
            id: 1,
            max_peer_count: 3,
        }
    }
}

/// What a region heartbeat changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionHeartbeatOutcome {
    /// Meta changed and was written to storage
    pub saved_kv: bool,
    /// The cached region was replaced
    pub saved_cache: bool,
    /// First time this region (or its leader) was seen
    pub is_new: bool,
    /// Regions swallowed by this one's key range
    pub overlaps: Vec<RegionInfo>,
    /// The region came out of a split: it was not cached before, or its
    /// range shrank with a version bump
    pub split: bool,
}

#[derive(Debug)]
struct ClusterCore {
    meta: ClusterMeta,
    stores: StoresInfo,
    regions: RegionsInfo,
    hot: HotCache,
}

impl ClusterCore {
    /// Copy the index's region-derived totals onto the given stores
    fn refresh_store_counters(&mut self, store_ids: impl IntoIterator<Item = u64>) {
        for store_id in store_ids {
            let stats = self.regions.store_stats(store_id);
            if let Some(store) = self.stores.get_mut(store_id) {
                store.leader_count = stats.leader_count;
                store.region_count = stats.region_count;
                store.pending_peer_count = stats.pending_peer_count;
                store.leader_size = stats.leader_size;
                store.region_size = stats.region_size;
            }
        }
    }
}

/// In-memory topology of stores and regions fed by heartbeats
pub struct ClusterInfo {
    core: RwLock<ClusterCore>,
    storage: Arc<dyn MetaStorage>,
    id_alloc: Arc<dyn IdAllocator>,
    clock: Arc<dyn Clock>,
    changes: Option<mpsc::Sender<RegionMeta>>,
}

impl std::fmt::Debug for ClusterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.read();
        f.debug_struct("ClusterInfo")
            .field("meta", &core.meta)
            .field("stores", &core.stores.len())
            .field("regions", &core.regions.len())
            .finish()
    }
}

impl ClusterInfo {
    /// Create an empty cache backed by in-memory storage
    pub fn new(meta: ClusterMeta, id_alloc: Arc<dyn IdAllocator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: RwLock::new(ClusterCore {
                meta,
                stores: StoresInfo::new(),
                regions: RegionsInfo::new(),
                hot: HotCache::new(HotThresholds::default()),
            }),
            storage: Arc::new(MemoryStorage::new()),
            id_alloc,
            clock,
            changes: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn MetaStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_hot_thresholds(self, thresholds: HotThresholds) -> Self {
        self.core.write().hot = HotCache::new(thresholds);
        self
    }

    /// Attach a bounded queue receiving the meta of every region whose
    /// meta changed. Sends never block; a full queue drops the change.
    pub fn with_change_notifier(mut self, capacity: usize) -> (Self, mpsc::Receiver<RegionMeta>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.changes = Some(tx);
        (self, rx)
    }

    pub fn meta(&self) -> ClusterMeta {
        self.core.read().meta
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    // ===== Stores =====

    pub fn get_store(&self, store_id: u64) -> Option<StoreInfo> {
        self.core.read().stores.get(store_id).cloned()
    }

    pub fn get_stores(&self) -> Vec<StoreInfo> {
        self.core.read().stores.iter().cloned().collect()
    }

    pub fn store_count(&self) -> usize {
        self.core.read().stores.len()
    }

    /// Insert a store or replace its meta. Status and derived counters of
    /// an existing store are kept. State may only move toward tombstone.
    pub fn put_store(&self, meta: StoreMeta) -> Result<()> {
        {
            let mut core = self.core.write();
            let store = match core.stores.get(meta.id) {
                Some(existing) => {
                    if existing.is_tombstone() {
                        return Err(PlacementError::StoreTombstone(meta.id));
                    }
                    if state_rank(meta.state) < state_rank(existing.state()) {
                        return Err(PlacementError::InvalidStoreState {
                            store_id: meta.id,
                            reason: format!("cannot move from {} to {}", existing.state(), meta.state),
                        });
                    }
                    let mut store = existing.clone();
                    store.meta = meta.clone();
                    store
                }
                None => {
                    info!(store_id = meta.id, address = %meta.address, "Store added");
                    StoreInfo::new(meta.clone())
                }
            };
            core.stores.put(store);
            let (stores, regions) = (core.stores.len(), core.regions.len());
            metrics::set_cache_sizes(stores, regions);
        }
        self.save_store(&meta);
        Ok(())
    }

    /// Apply a store heartbeat's status block
    pub fn handle_store_heartbeat(&self, stats: StoreStats) -> Result<()> {
        let store_id = stats.store_id;
        let now = self.clock.now();
        let mut core = self.core.write();
        let Some(store) = core.stores.get_mut(store_id) else {
            warn!(store_id, "Heartbeat from unknown store");
            metrics::record_heartbeat("store", "not_found");
            return Err(PlacementError::StoreNotFound(store_id));
        };
        if store.is_tombstone() {
            metrics::record_heartbeat("store", "tombstone");
            return Err(PlacementError::StoreTombstone(store_id));
        }
        store.stats = stats;
        store.last_heartbeat = Some(now);
        metrics::record_heartbeat("store", "ok");
        Ok(())
    }

    /// Start decommissioning a store (Up → Offline)
    pub fn remove_store(&self, store_id: u64) -> Result<()> {
        let meta = {
            let mut core = self.core.write();
            let store = core
                .stores
                .get_mut(store_id)
                .ok_or(PlacementError::StoreNotFound(store_id))?;
            match store.state() {
                StoreState::Tombstone => return Err(PlacementError::StoreTombstone(store_id)),
                StoreState::Offline => return Ok(()),
                StoreState::Up => store.meta.state = StoreState::Offline,
            }
            store.meta.clone()
        };
        warn!(store_id, "Store set offline");
        self.save_store(&meta);
        Ok(())
    }

    /// Mark a store tombstone. An Up store needs `force`.
    pub fn bury_store(&self, store_id: u64, force: bool) -> Result<()> {
        let meta = {
            let mut core = self.core.write();
            let store = core
                .stores
                .get_mut(store_id)
                .ok_or(PlacementError::StoreNotFound(store_id))?;
            match store.state() {
                StoreState::Tombstone => return Ok(()),
                StoreState::Up if !force => {
                    return Err(PlacementError::InvalidStoreState {
                        store_id,
                        reason: "store is up, bury requires force".into(),
                    })
                }
                _ => store.meta.state = StoreState::Tombstone,
            }
            store.meta.clone()
        };
        warn!(store_id, force, "Store buried");
        self.save_store(&meta);
        Ok(())
    }

    // ===== Regions =====

    pub fn get_region(&self, region_id: u64) -> Option<RegionInfo> {
        self.core.read().regions.get(region_id).cloned()
    }

    /// All regions in key order
    pub fn get_regions(&self) -> Vec<RegionInfo> {
        self.core.read().regions.iter().cloned().collect()
    }

    pub fn region_count(&self) -> usize {
        self.core.read().regions.len()
    }

    pub fn search_region(&self, key: &[u8]) -> Option<RegionInfo> {
        self.core.read().regions.search(key).cloned()
    }

    /// Neighbours before and after `region` in key order
    pub fn get_adjacent_regions(&self, region: &RegionInfo) -> (Option<RegionInfo>, Option<RegionInfo>) {
        let core = self.core.read();
        let (prev, next) = core.regions.adjacent(region);
        (prev.cloned(), next.cloned())
    }

    /// Replace a region unconditionally, without epoch checks. Returns the
    /// regions it overlapped.
    pub fn put_region(&self, region: RegionInfo) -> Vec<RegionInfo> {
        let overlaps = {
            let mut core = self.core.write();
            let origin = core.regions.get(region.id()).cloned();
            let overlaps = core.regions.put(region.clone());
            let affected = affected_stores(origin.as_ref(), &region, &overlaps);
            core.refresh_store_counters(affected);
            let (stores, regions) = (core.stores.len(), core.regions.len());
            metrics::set_cache_sizes(stores, regions);
            overlaps
        };
        self.save_region(&region.meta);
        for overlap in &overlaps {
            self.delete_region(&overlap.meta);
        }
        overlaps
    }

    /// Fold a region heartbeat into the cache.
    ///
    /// Rejects reports whose epoch is older than what is cached (or, for an
    /// unknown region, older than an overlapping one). Meta changes are
    /// persisted; health and leader changes only refresh the cache.
    #[instrument(skip(self, region), fields(region_id = region.id()))]
    pub fn handle_region_heartbeat(&self, region: RegionInfo) -> Result<RegionHeartbeatOutcome> {
        if !region.has_valid_range() {
            warn!(
                start_key = ?region.start_key(),
                end_key = ?region.end_key(),
                "Rejecting region heartbeat with invalid key range"
            );
            metrics::record_heartbeat("region", "invalid");
            return Err(PlacementError::InvalidRegion {
                region_id: region.id(),
                reason: "start key must sort before end key".into(),
            });
        }

        let mut outcome = RegionHeartbeatOutcome::default();
        {
            let mut core = self.core.write();
            let origin = core.regions.get(region.id()).cloned();
            let epoch = region.epoch();

            match &origin {
                None => {
                    let newer = core
                        .regions
                        .overlaps(region.start_key(), region.end_key())
                        .into_iter()
                        .find(|o| o.epoch().version > epoch.version)
                        .map(|o| o.epoch());
                    if let Some(cached) = newer {
                        metrics::record_heartbeat("region", "stale");
                        return Err(stale(region.id(), epoch, cached));
                    }
                    outcome.saved_kv = true;
                    outcome.saved_cache = true;
                    outcome.is_new = true;
                    outcome.split = true;
                }
                Some(o) => {
                    let cached = o.epoch();
                    if epoch.is_stale_against(&cached) {
                        metrics::record_heartbeat("region", "stale");
                        return Err(stale(region.id(), epoch, cached));
                    }
                    outcome.saved_kv = epoch.version > cached.version
                        || epoch.conf_ver > cached.conf_ver
                        || region.peers().len() != o.peers().len();
                    outcome.saved_cache = outcome.saved_kv
                        || region.leader_store_id() != o.leader_store_id()
                        || region.leader.map(|l| l.id) != o.leader.map(|l| l.id)
                        || !o.down_peers.is_empty()
                        || !region.down_peers.is_empty()
                        || !o.pending_peers.is_empty()
                        || !region.pending_peers.is_empty()
                        || region.approximate_size != o.approximate_size
                        || region.approximate_keys != o.approximate_keys;
                    outcome.is_new = o.leader.is_none();
                    outcome.split = epoch.version > cached.version && region.is_shrunk_from(o);
                }
            }

            core.hot.update(&region);

            if outcome.saved_cache {
                let overlaps = core.regions.put(region.clone());
                for overlap in &overlaps {
                    core.hot.remove(overlap.id());
                    info!(
                        region_id = region.id(),
                        overlap_id = overlap.id(),
                        "Region overlaps cached region, removing"
                    );
                }
                let affected = affected_stores(origin.as_ref(), &region, &overlaps);
                core.refresh_store_counters(affected);
                let (stores, regions) = (core.stores.len(), core.regions.len());
                metrics::set_cache_sizes(stores, regions);
                outcome.overlaps = overlaps;
            }
        }

        if outcome.saved_kv {
            debug!(epoch = %region.epoch(), peers = region.peers().len(), "Region meta changed");
            self.save_region(&region.meta);
        }
        for overlap in &outcome.overlaps {
            self.delete_region(&overlap.meta);
        }
        if outcome.saved_kv {
            self.notify_change(&region.meta);
        }
        metrics::record_heartbeat("region", "ok");
        Ok(outcome)
    }

    // ===== Sampling =====

    /// Stores hosting a peer of `region`
    pub fn get_region_stores(&self, region: &RegionInfo) -> Vec<StoreInfo> {
        self.stores_by_ids(region.store_ids())
    }

    /// Stores hosting a voting non-leader peer of `region`
    pub fn get_follower_stores(&self, region: &RegionInfo) -> Vec<StoreInfo> {
        self.stores_by_ids(region.follower_store_ids())
    }

    pub fn get_leader_store(&self, region: &RegionInfo) -> Option<StoreInfo> {
        region.leader_store_id().and_then(|id| self.get_store(id))
    }

    fn stores_by_ids(&self, ids: BTreeSet<u64>) -> Vec<StoreInfo> {
        let core = self.core.read();
        ids.into_iter()
            .filter_map(|id| core.stores.get(id).cloned())
            .collect()
    }

    /// Random region led by `store_id`
    pub fn rand_leader_region(&self, store_id: u64) -> Option<RegionInfo> {
        self.rand_leader_region_where(store_id, |_| true)
    }

    /// Random region with a follower on `store_id`
    pub fn rand_follower_region(&self, store_id: u64) -> Option<RegionInfo> {
        self.rand_follower_region_where(store_id, |_| true)
    }

    pub fn rand_leader_region_where<F>(&self, store_id: u64, accept: F) -> Option<RegionInfo>
    where
        F: Fn(&RegionInfo) -> bool,
    {
        self.core
            .read()
            .regions
            .random_leader_region(store_id, accept)
            .cloned()
    }

    pub fn rand_follower_region_where<F>(&self, store_id: u64, accept: F) -> Option<RegionInfo>
    where
        F: Fn(&RegionInfo) -> bool,
    {
        self.core
            .read()
            .regions
            .random_follower_region(store_id, accept)
            .cloned()
    }

    pub fn is_region_hot(&self, region_id: u64) -> bool {
        self.core.read().hot.is_region_hot(region_id)
    }

    // ===== Ids =====

    pub fn alloc_id(&self) -> Result<u64> {
        self.id_alloc.alloc_id()
    }

    /// New voting peer on `store_id` with a fresh id
    pub fn alloc_peer(&self, store_id: u64) -> Result<Peer> {
        let id = self.alloc_id()?;
        Ok(Peer::new(id, store_id))
    }

    // ===== Persistence =====

    /// Rebuild the cache from storage after a restart. Loaded regions have
    /// no leader and no size until their first heartbeat.
    pub fn load_from_storage(&self) -> Result<(usize, usize)> {
        let stores = self.storage.load_stores()?;
        let regions = self.storage.load_regions()?;

        let mut core = self.core.write();
        for meta in stores {
            core.stores.put(StoreInfo::new(meta));
        }
        for meta in regions {
            core.regions.put(RegionInfo::new(meta, None));
        }
        let ids: Vec<u64> = core.stores.iter().map(|s| s.id()).collect();
        core.refresh_store_counters(ids);

        let counts = (core.stores.len(), core.regions.len());
        metrics::set_cache_sizes(counts.0, counts.1);
        info!(stores = counts.0, regions = counts.1, "Loaded topology from storage");
        Ok(counts)
    }

    fn save_store(&self, meta: &StoreMeta) {
        if let Err(e) = self.storage.save_store(meta) {
            metrics::record_storage_error("save_store");
            warn!(store_id = meta.id, error = %e, "Failed to save store");
        }
    }

    fn save_region(&self, meta: &RegionMeta) {
        if let Err(e) = self.storage.save_region(meta) {
            metrics::record_storage_error("save_region");
            warn!(region_id = meta.id, error = %e, "Failed to save region");
        }
    }

    fn delete_region(&self, meta: &RegionMeta) {
        if let Err(e) = self.storage.delete_region(meta) {
            metrics::record_storage_error("delete_region");
            warn!(region_id = meta.id, error = %e, "Failed to delete region");
        }
    }

    fn notify_change(&self, meta: &RegionMeta) {
        let Some(tx) = &self.changes else { return };
        match tx.try_send(meta.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_change_dropped();
                debug!(region_id = meta.id, "Change queue full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

fn state_rank(state: StoreState) -> u8 {
    match state {
        StoreState::Up => 0,
        StoreState::Offline => 1,
        StoreState::Tombstone => 2,
    }
}

fn stale(region_id: u64, reported: crate::models::RegionEpoch, cached: crate::models::RegionEpoch) -> PlacementError {
    debug!(region_id, %reported, %cached, "Rejecting stale region heartbeat");
    PlacementError::RegionStale {
        region_id,
        reported: reported.to_string(),
        cached: cached.to_string(),
    }
}

fn affected_stores(origin: Option<&RegionInfo>, region: &RegionInfo, overlaps: &[RegionInfo]) -> BTreeSet<u64> {
    let mut ids = region.store_ids();
    if let Some(origin) = origin {
        ids.extend(origin.store_ids());
    }
    for overlap in overlaps {
        ids.extend(overlap.store_ids());
    }
    ids
}
