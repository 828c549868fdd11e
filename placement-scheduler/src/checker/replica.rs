//! Replica checker
//!
//! Keeps every region at the configured replica count on healthy, well
//! spread stores. Checks run in a fixed order and the first one that
//! applies produces the operator:
//!
//! 1. peers on down stores
//! 2. peers on offline stores
//! 3. missing replicas
//! 4. extra replicas
//! 5. a strictly better location for the worst-placed peer

use crate::config::PlacementConfig;
use crate::filter::{
    ConstraintFilter, ExcludedFilter, Filter, Filters, HealthFilter, NamespaceFilter,
    PendingPeerCountFilter, SnapshotCountFilter, StateFilter, StorageThresholdFilter,
};
use crate::metrics;
use crate::namespace::Classifier;
use crate::operator::{
    create_add_peer_operator, create_move_peer_operator, create_remove_peer_operator, Operator,
    OperatorKind,
};
use crate::scoring::distinct_score;
use crate::selector::ReplicaSelector;
use placement_metadata::{ClusterInfo, Peer, RegionInfo, StoreInfo};
use std::sync::Arc;
use tracing::debug;

/// Checker restoring replica count and placement
pub struct ReplicaChecker {
    cluster: Arc<ClusterInfo>,
    config: Arc<PlacementConfig>,
    classifier: Arc<dyn Classifier>,
    filters: Filters,
}

impl ReplicaChecker {
    pub fn new(
        cluster: Arc<ClusterInfo>,
        config: Arc<PlacementConfig>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let schedule = &config.schedule;
        let filters: Filters = vec![
            Arc::new(StateFilter),
            Arc::new(HealthFilter::new(cluster.clock(), schedule.max_store_down_time())),
            Arc::new(SnapshotCountFilter::new(schedule.max_snapshot_count)),
            Arc::new(PendingPeerCountFilter::new(schedule.max_pending_peer_count)),
        ];
        Self {
            cluster,
            config,
            classifier,
            filters,
        }
    }

    /// First applicable repair for `region`, if any
    pub fn check(&self, region: &RegionInfo) -> Option<Operator> {
        metrics::record_checker("replica", "check");

        if let Some(op) = self.check_down_peer(region) {
            return Some(op);
        }
        if let Some(op) = self.check_offline_peer(region) {
            return Some(op);
        }

        let schedule = &self.config.schedule;
        let max_replicas = self.config.replication.max_replicas;

        if region.peers().len() < max_replicas && schedule.enable_make_up_replica {
            debug!(region_id = region.id(), peers = region.peers().len(), "Region lacks replicas");
            let Some((store, _)) = self.select_best_store_to_add(region, &[]) else {
                metrics::record_checker("replica", "no_target");
                return None;
            };
            let peer = self.alloc_peer(store.id())?;
            return Some(create_add_peer_operator(
                "make-up-replica",
                region,
                peer,
                OperatorKind::REPLICA,
                self.cluster.now(),
            ));
        }

        if region.voters().len() > max_replicas && schedule.enable_remove_extra_replica {
            debug!(region_id = region.id(), voters = region.voters().len(), "Region has extra replicas");
            let worst = self.select_worst_peer(region)?;
            return Some(create_remove_peer_operator(
                "remove-extra-replica",
                region,
                worst.store_id,
                OperatorKind::REPLICA,
                self.cluster.now(),
            ));
        }

        if schedule.enable_location_replacement {
            return self.check_best_replacement(region);
        }
        None
    }

    fn check_down_peer(&self, region: &RegionInfo) -> Option<Operator> {
        if !self.config.schedule.enable_remove_down_replica {
            return None;
        }
        let max_down_time = self.config.schedule.max_store_down_time();
        let now = self.cluster.now();

        for stats in &region.down_peers {
            let peer = stats.peer;
            let Some(store) = self.cluster.get_store(peer.store_id) else {
                debug!(region_id = region.id(), store_id = peer.store_id, "Down peer on unknown store");
                continue;
            };
            // Both the store heartbeat gap and the leader's view must agree
            if store.down_time(now) < max_down_time {
                continue;
            }
            if stats.down_seconds < max_down_time.as_secs() {
                continue;
            }
            return self.fix_peer(region, peer, "down");
        }
        None
    }

    fn check_offline_peer(&self, region: &RegionInfo) -> Option<Operator> {
        if !self.config.schedule.enable_replace_offline_replica {
            return None;
        }

        for peer in region.peers() {
            if peer.is_learner {
                continue;
            }
            let Some(store) = self.cluster.get_store(peer.store_id) else {
                debug!(region_id = region.id(), store_id = peer.store_id, "Peer on unknown store");
                return None;
            };
            if store.is_up() {
                continue;
            }

            if region.peers().len() > self.config.replication.max_replicas {
                return Some(self.remove_peer("remove-extra-offline-replica", region, peer.store_id));
            }
            // A pending peer has no data worth moving
            if region.pending_peer(peer.id).is_some() {
                return Some(self.remove_peer("remove-pending-offline-replica", region, peer.store_id));
            }
            return self.fix_peer(region, *peer, "offline");
        }
        None
    }

    /// Remove `peer` if the region has spare replicas, otherwise move it
    fn fix_peer(&self, region: &RegionInfo, peer: Peer, status: &str) -> Option<Operator> {
        if region.peers().len() > self.config.replication.max_replicas {
            return Some(self.remove_peer(&format!("remove-extra-{status}-replica"), region, peer.store_id));
        }

        let Some(store) = self.select_best_replacement_store(region, peer.store_id) else {
            debug!(region_id = region.id(), store_id = peer.store_id, status, "No store to replace peer");
            metrics::record_checker("replica", "no_target");
            return None;
        };
        let new_peer = self.alloc_peer(store.id())?;
        Some(create_move_peer_operator(
            &format!("replace-{status}-replica"),
            region,
            peer.store_id,
            new_peer,
            OperatorKind::REPLICA,
            self.cluster.now(),
        ))
    }

    fn check_best_replacement(&self, region: &RegionInfo) -> Option<Operator> {
        let labels = &self.config.replication.location_labels;
        if labels.is_empty() {
            return None;
        }

        let old = self.select_worst_peer(region)?;
        let remaining: Vec<StoreInfo> = self
            .cluster
            .get_region_stores(region)
            .into_iter()
            .filter(|s| s.id() != old.store_id)
            .collect();
        let old_store = self.cluster.get_store(old.store_id)?;
        let old_score = distinct_score(labels, &remaining, &old_store);

        let trimmed = region.without_store_peer(old.store_id);
        let extra: Vec<Arc<dyn Filter>> = vec![Arc::new(ExcludedFilter::new([], region.store_ids()))];
        let (store, new_score) = self.select_best_store_to_add(&trimmed, &extra)?;

        // Equal scores never trigger a move
        if new_score >= old_score {
            return None;
        }
        debug!(
            region_id = region.id(),
            from_store = old.store_id,
            to_store = store.id(),
            old_score,
            new_score,
            "Found better location"
        );
        let new_peer = self.alloc_peer(store.id())?;
        Some(create_move_peer_operator(
            "move-to-better-location",
            region,
            old.store_id,
            new_peer,
            OperatorKind::REPLICA,
            self.cluster.now(),
        ))
    }

    /// Best store for a new replica of `region`, with its distinct score
    fn select_best_store_to_add(
        &self,
        region: &RegionInfo,
        extra: &[Arc<dyn Filter>],
    ) -> Option<(StoreInfo, f64)> {
        let region_stores = self.cluster.get_region_stores(region);
        let namespace = self.classifier.region_namespace(region);

        let mut filters: Vec<Arc<dyn Filter>> = extra.to_vec();
        filters.push(Arc::new(ExcludedFilter::new([], region.store_ids())));
        filters.push(Arc::new(StorageThresholdFilter::new(
            self.config.schedule.low_space_ratio,
        )));
        filters.push(Arc::new(NamespaceFilter::new(self.classifier.clone(), namespace)));
        filters.push(Arc::new(ConstraintFilter::new(
            &self.config.replication,
            region_stores.clone(),
        )));

        let selector = ReplicaSelector::new(
            self.config.replication.location_labels.clone(),
            self.filters.clone(),
        );
        selector.select_target_scored(&self.cluster.get_stores(), &region_stores, &filters)
    }

    /// Best store to take over the peer on `old_store`
    fn select_best_replacement_store(&self, region: &RegionInfo, old_store: u64) -> Option<StoreInfo> {
        let trimmed = region.without_store_peer(old_store);
        let extra: Vec<Arc<dyn Filter>> = vec![Arc::new(ExcludedFilter::new([], region.store_ids()))];
        self.select_best_store_to_add(&trimmed, &extra)
            .map(|(store, _)| store)
    }

    /// Worst-placed voter of `region`
    fn select_worst_peer(&self, region: &RegionInfo) -> Option<Peer> {
        let region_stores = self.cluster.get_region_stores(region);
        let voter_stores: Vec<StoreInfo> = region_stores
            .iter()
            .filter(|s| region.store_peer(s.id()).is_some_and(|p| !p.is_learner))
            .cloned()
            .collect();
        let selector = ReplicaSelector::new(
            self.config.replication.location_labels.clone(),
            self.filters.clone(),
        );
        let worst = selector.select_source(&voter_stores, &region_stores)?;
        region.store_peer(worst.id()).copied()
    }

    fn remove_peer(&self, desc: &str, region: &RegionInfo, store_id: u64) -> Operator {
        create_remove_peer_operator(desc, region, store_id, OperatorKind::REPLICA, self.cluster.now())
    }

    fn alloc_peer(&self, store_id: u64) -> Option<Peer> {
        match self.cluster.alloc_peer(store_id) {
            Ok(peer) => Some(peer),
            Err(e) => {
                tracing::warn!(store_id, error = %e, "Failed to allocate peer");
                None
            }
        }
    }
}
