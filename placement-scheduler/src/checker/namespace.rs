//! Namespace checker
//!
//! Moves peers that sit on stores outside their region's namespace to a
//! random eligible store inside it.

use crate::config::PlacementConfig;
use crate::filter::{
    ExcludedFilter, Filter, Filters, HealthFilter, NamespaceFilter, PendingPeerCountFilter,
    SnapshotCountFilter, StateFilter, StorageThresholdFilter,
};
use crate::metrics;
use crate::namespace::Classifier;
use crate::operator::{create_move_peer_operator, Operator, OperatorKind};
use crate::selector::RandomSelector;
use placement_metadata::{ClusterInfo, RegionInfo};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct NamespaceChecker {
    cluster: Arc<ClusterInfo>,
    config: Arc<PlacementConfig>,
    classifier: Arc<dyn Classifier>,
    selector: RandomSelector,
}

impl NamespaceChecker {
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
            Arc::new(StorageThresholdFilter::new(schedule.low_space_ratio)),
        ];
        Self {
            cluster,
            config,
            classifier,
            selector: RandomSelector::new(filters),
        }
    }

    pub fn check(&self, region: &RegionInfo) -> Option<Operator> {
        if !self.config.schedule.enable_namespace_relocation {
            return None;
        }
        let namespace = self.classifier.region_namespace(region);

        for peer in region.peers() {
            let Some(store) = self.cluster.get_store(peer.store_id) else {
                continue;
            };
            if self.classifier.store_namespace(&store) == namespace {
                continue;
            }

            let extra: Vec<Arc<dyn Filter>> = vec![
                Arc::new(NamespaceFilter::new(self.classifier.clone(), namespace.clone())),
                Arc::new(ExcludedFilter::new([], region.store_ids())),
            ];
            let Some(target) = self.selector.select_target(&self.cluster.get_stores(), &extra) else {
                debug!(region_id = region.id(), namespace = %namespace, "No store in namespace");
                metrics::record_checker("namespace", "no_target");
                return None;
            };
            let new_peer = match self.cluster.alloc_peer(target.id()) {
                Ok(peer) => peer,
                Err(e) => {
                    warn!(error = %e, "Failed to allocate peer");
                    return None;
                }
            };
            metrics::record_checker("namespace", "relocate");
            return Some(create_move_peer_operator(
                "make-namespace-relocation",
                region,
                peer.store_id,
                new_peer,
                OperatorKind::REPLICA,
                self.cluster.now(),
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::DefaultClassifier;
    use crate::operator::OperatorStep;
    use placement_core::{ManualClock, MemoryIdAllocator};
    use placement_metadata::{
        ClusterMeta, Peer, RegionEpoch, RegionMeta, StoreInfo, StoreMeta, StoreStats,
    };
    use std::collections::HashMap;

    /// Regions by id and stores by id map to fixed namespaces
    struct TableClassifier {
        regions: HashMap<u64, String>,
        stores: HashMap<u64, String>,
    }

    impl Classifier for TableClassifier {
        fn namespaces(&self) -> Vec<String> {
            let mut names: Vec<String> = self.stores.values().cloned().collect();
            names.sort();
            names.dedup();
            names
        }

        fn region_namespace(&self, region: &RegionInfo) -> String {
            self.regions.get(&region.id()).cloned().unwrap_or_default()
        }

        fn store_namespace(&self, store: &StoreInfo) -> String {
            self.stores.get(&store.id()).cloned().unwrap_or_default()
        }
    }

    fn setup() -> Arc<ClusterInfo> {
        let cluster = Arc::new(ClusterInfo::new(
            ClusterMeta::default(),
            Arc::new(MemoryIdAllocator::new(100)),
            ManualClock::shared(),
        ));
        for id in 1..=5 {
            cluster
                .put_store(StoreMeta {
                    id,
                    ..Default::default()
                })
                .unwrap();
            cluster
                .handle_store_heartbeat(StoreStats {
                    store_id: id,
                    capacity: 100,
                    available: 50,
                    ..Default::default()
                })
                .unwrap();
        }
        cluster
    }

    fn region(stores: &[u64]) -> RegionInfo {
        let peers: Vec<Peer> = stores.iter().map(|s| Peer::new(10 + s, *s)).collect();
        RegionInfo::new(
            RegionMeta {
                id: 1,
                start_key: vec![],
                end_key: vec![],
                epoch: RegionEpoch::new(1, 1),
                peers: peers.clone(),
            },
            peers.first().copied(),
        )
    }

    #[test]
    fn test_relocates_peer_outside_namespace() {
        let cluster = setup();
        let classifier = TableClassifier {
            regions: HashMap::from([(1, "ns1".to_string())]),
            stores: HashMap::from([
                (1, "ns1".to_string()),
                (2, "ns1".to_string()),
                (3, "ns2".to_string()),
                (4, "ns1".to_string()),
                (5, "ns2".to_string()),
            ]),
        };
        let checker = NamespaceChecker::new(
            cluster,
            Arc::new(PlacementConfig::default()),
            Arc::new(classifier),
        );

        let op = checker.check(&region(&[1, 2, 3])).unwrap();
        assert_eq!(op.desc(), "make-namespace-relocation");
        assert!(matches!(op.steps()[0], OperatorStep::AddPeer { to_store: 4, .. }));
        assert_eq!(op.steps().last(), Some(&OperatorStep::RemovePeer { from_store: 3 }));

        assert!(checker.check(&region(&[1, 2, 4])).is_none());
    }

    #[test]
    fn test_default_classifier_is_noop() {
        let checker = NamespaceChecker::new(
            setup(),
            Arc::new(PlacementConfig::default()),
            Arc::new(DefaultClassifier),
        );
        assert!(checker.check(&region(&[1, 2, 3])).is_none());
    }
}
