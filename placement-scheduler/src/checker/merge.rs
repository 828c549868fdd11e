//! Merge checker
//!
//! Finds small, healthy regions and merges them into an adjacent region.
//! Nothing is merged during the grace period after start-up, when region
//! sizes are still unknown, nor shortly after a region was split.

use crate::config::PlacementConfig;
use crate::metrics;
use crate::namespace::Classifier;
use crate::operator::{create_merge_region_operator, Operator, OperatorKind};
use placement_core::TtlCache;
use placement_metadata::{ClusterInfo, RegionInfo};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub struct MergeChecker {
    cluster: Arc<ClusterInfo>,
    config: Arc<PlacementConfig>,
    classifier: Arc<dyn Classifier>,
    split_cache: Arc<TtlCache>,
    started_at: Instant,
}

impl MergeChecker {
    pub fn new(
        cluster: Arc<ClusterInfo>,
        config: Arc<PlacementConfig>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let split_cache = Arc::new(TtlCache::new("region-split", cluster.clock()));
        let started_at = cluster.now();
        Self {
            cluster,
            config,
            classifier,
            split_cache,
            started_at,
        }
    }

    /// Cache of recently split regions, swept by the coordinator
    pub fn split_cache(&self) -> Arc<TtlCache> {
        self.split_cache.clone()
    }

    /// Keep freshly split regions out of merges for the grace period
    pub fn record_region_split(&self, region_ids: &[u64]) {
        let ttl = self.config.schedule.split_merge_interval();
        for id in region_ids {
            self.split_cache.put(*id, ttl);
        }
    }

    /// Active and passive merge operators for `region`, if it should merge
    pub fn check(&self, region: &RegionInfo) -> Option<(Operator, Operator)> {
        let schedule = &self.config.schedule;
        let max_replicas = self.config.replication.max_replicas;

        if self.cluster.now().saturating_duration_since(self.started_at) < schedule.split_merge_interval() {
            return None;
        }
        if self.split_cache.contains(region.id()) {
            metrics::record_checker("merge", "recently_split");
            return None;
        }
        // Size unknown until the first heartbeat after loading
        if region.approximate_size == 0 {
            return None;
        }
        if region.approximate_size > schedule.max_merge_region_size_mb
            || region.approximate_keys > schedule.max_merge_region_keys
        {
            return None;
        }
        if region.has_unhealthy_peer() || region.peers().len() != max_replicas {
            return None;
        }
        if self.cluster.is_region_hot(region.id()) {
            metrics::record_checker("merge", "hot");
            return None;
        }

        let (prev, next) = self.cluster.get_adjacent_regions(region);
        let mut target = next.filter(|r| self.is_merge_target(region, r, max_replicas));
        if !schedule.enable_one_way_merge {
            if let Some(prev) = prev.filter(|r| self.is_merge_target(region, r, max_replicas)) {
                let smaller = target
                    .as_ref()
                    .map_or(true, |t| prev.approximate_size < t.approximate_size);
                if smaller {
                    target = Some(prev);
                }
            }
        }
        let target = target?;

        debug!(
            region_id = region.id(),
            target_id = target.id(),
            size = region.approximate_size,
            "Merging region into neighbour"
        );
        match create_merge_region_operator("merge-region", &self.cluster, region, &target, OperatorKind::MERGE) {
            Ok(ops) => {
                metrics::record_checker("merge", "new_operator");
                Some(ops)
            }
            Err(e) => {
                warn!(region_id = region.id(), error = %e, "Failed to create merge operator");
                None
            }
        }
    }

    fn is_merge_target(&self, region: &RegionInfo, adjacent: &RegionInfo, max_replicas: usize) -> bool {
        !self.cluster.is_region_hot(adjacent.id())
            && !self.split_cache.contains(adjacent.id())
            && self.classifier.allow_merge(region, adjacent)
            && !adjacent.has_unhealthy_peer()
            && adjacent.peers().len() == max_replicas
    }
}
