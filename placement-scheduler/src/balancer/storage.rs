//! Storage balancer
//!
//! Moves one peer at a time from the store with the highest used ratio to
//! the emptiest store that keeps the region's placement at least as good.
//! Sources for which no legal target exists are skipped for a while.

use super::Scheduler;
use crate::config::PlacementConfig;
use crate::filter::{
    ConstraintFilter, DistinctScoreFilter, ExcludedFilter, Filter, Filters, HealthFilter,
    PendingPeerCountFilter, SnapshotCountFilter, StateFilter, StorageThresholdFilter,
};
use crate::metrics;
use crate::operator::{create_move_peer_operator, Operator, OperatorKind};
use crate::selector::{BalanceSelector, ResourceKind};
use placement_core::TtlCache;
use placement_metadata::{ClusterInfo, RegionInfo, StoreInfo};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const NAME: &str = "balance-storage-scheduler";

pub struct StorageBalancer {
    config: Arc<PlacementConfig>,
    selector: BalanceSelector,
    skip_cache: Arc<TtlCache>,
}

impl StorageBalancer {
    pub fn new(cluster: &ClusterInfo, config: Arc<PlacementConfig>) -> Self {
        let schedule = &config.schedule;
        let filters: Filters = vec![
            Arc::new(StateFilter),
            Arc::new(HealthFilter::new(cluster.clock(), schedule.max_store_down_time())),
            Arc::new(SnapshotCountFilter::new(schedule.max_snapshot_count)),
            Arc::new(PendingPeerCountFilter::new(schedule.max_pending_peer_count)),
            Arc::new(StorageThresholdFilter::new(schedule.low_space_ratio)),
        ];
        Self {
            skip_cache: Arc::new(TtlCache::new("store-balance-skip", cluster.clock())),
            selector: BalanceSelector::new(ResourceKind::Storage, filters),
            config,
        }
    }

    /// Stores currently skipped as sources
    pub fn skipped_stores(&self) -> Vec<u64> {
        self.skip_cache.ids()
    }

    fn pick_region(&self, cluster: &ClusterInfo, store_id: u64) -> Option<RegionInfo> {
        let max_replicas = self.config.replication.max_replicas;
        let accept = |r: &RegionInfo| {
            r.peers().len() == max_replicas && r.down_peers.is_empty() && r.pending_peers.is_empty()
        };
        // Prefer followers so leadership stays put
        cluster
            .rand_follower_region_where(store_id, accept)
            .or_else(|| cluster.rand_leader_region_where(store_id, accept))
    }

    fn select_target(
        &self,
        cluster: &ClusterInfo,
        region: &RegionInfo,
        source: &StoreInfo,
    ) -> Option<StoreInfo> {
        let replication = &self.config.replication;
        let region_stores = cluster.get_region_stores(region);
        let remaining: Vec<StoreInfo> = region_stores
            .iter()
            .filter(|s| s.id() != source.id())
            .cloned()
            .collect();

        let extra: Vec<Arc<dyn Filter>> = vec![
            Arc::new(ExcludedFilter::new([], region.store_ids())),
            Arc::new(DistinctScoreFilter::new(
                &replication.location_labels,
                &region_stores,
                source,
            )),
            Arc::new(ConstraintFilter::new(replication, remaining)),
        ];
        self.selector.select_target(&cluster.get_stores(), &extra)
    }
}

impl Scheduler for StorageBalancer {
    fn name(&self) -> &str {
        NAME
    }

    fn resource_kind(&self) -> OperatorKind {
        OperatorKind::REGION
    }

    fn min_interval(&self) -> Duration {
        self.config.schedule.region_schedule_interval()
    }

    fn schedule(&self, cluster: &ClusterInfo) -> Option<Operator> {
        let schedule = &self.config.schedule;
        let stores = cluster.get_stores();

        let skipped: Vec<Arc<dyn Filter>> =
            vec![Arc::new(ExcludedFilter::new(self.skip_cache.ids(), []))];
        let source = self.selector.select_source(&stores, &skipped)?;
        if source.region_count < schedule.min_region_count {
            metrics::record_scheduler(NAME, "below_min_count");
            return None;
        }

        let Some(region) = self.pick_region(cluster, source.id()) else {
            debug!(store_id = source.id(), "No movable region on source store");
            metrics::record_scheduler(NAME, "no_region");
            return None;
        };

        let Some(target) = self.select_target(cluster, &region, &source) else {
            debug!(
                store_id = source.id(),
                region_id = region.id(),
                "No legal target, skipping source store"
            );
            self.skip_cache.put(source.id(), schedule.store_balance_skip());
            metrics::record_scheduler(NAME, "no_target");
            return None;
        };

        if source.storage_ratio() - target.storage_ratio() < schedule.min_balance_diff_ratio {
            metrics::record_scheduler(NAME, "balanced");
            return None;
        }

        let new_peer = match cluster.alloc_peer(target.id()) {
            Ok(peer) => peer,
            Err(e) => {
                warn!(error = %e, "Failed to allocate peer");
                return None;
            }
        };
        debug!(
            region_id = region.id(),
            source = source.id(),
            target = target.id(),
            source_ratio = source.storage_ratio(),
            target_ratio = target.storage_ratio(),
            "Balancing region"
        );
        metrics::record_scheduler(NAME, "new_operator");
        Some(create_move_peer_operator(
            "balance-region",
            &region,
            source.id(),
            new_peer,
            OperatorKind::BALANCE,
            cluster.now(),
        ))
    }

    fn ttl_caches(&self) -> Vec<Arc<TtlCache>> {
        vec![self.skip_cache.clone()]
    }
}
