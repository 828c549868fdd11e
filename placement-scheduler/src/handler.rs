//! Admin operations
//!
//! Operators requested by a cluster administrator. They carry the `ADMIN`
//! flag and so replace any balance or replica operator of the region.

use crate::coordinator::Coordinator;
use crate::operator::{
    create_add_peer_operator, create_move_peer_operator, create_remove_peer_operator,
    create_transfer_leader_operator, Operator, OperatorKind,
};
use placement_core::{PlacementError, Result};
use placement_metadata::{RegionInfo, StoreInfo};
use std::sync::Arc;
use tracing::info;

pub struct Handler {
    coordinator: Arc<Coordinator>,
}

impl Handler {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    fn region(&self, region_id: u64) -> Result<RegionInfo> {
        self.coordinator
            .cluster()
            .get_region(region_id)
            .ok_or(PlacementError::RegionNotFound(region_id))
    }

    fn live_store(&self, store_id: u64) -> Result<StoreInfo> {
        let store = self
            .coordinator
            .cluster()
            .get_store(store_id)
            .ok_or(PlacementError::StoreNotFound(store_id))?;
        if store.is_tombstone() {
            return Err(PlacementError::StoreTombstone(store_id));
        }
        Ok(store)
    }

    fn submit(&self, op: Operator) -> Result<()> {
        info!(region_id = op.region_id(), operator = %op, "Admin operator requested");
        self.coordinator.add_operator(op)
    }

    /// Move leadership of `region_id` to its voter on `to_store`
    pub fn transfer_leader(&self, region_id: u64, to_store: u64) -> Result<()> {
        let region = self.region(region_id)?;
        self.live_store(to_store)?;
        if !region.store_peer(to_store).is_some_and(|p| !p.is_learner) {
            return Err(rejected(region_id, format!("no voter on store {to_store}")));
        }
        let from_store = region
            .leader_store_id()
            .ok_or_else(|| rejected(region_id, "region has no leader".to_string()))?;
        if from_store == to_store {
            return Err(rejected(region_id, format!("store {to_store} already leads")));
        }
        let now = self.coordinator.cluster().now();
        self.submit(create_transfer_leader_operator(
            "admin-transfer-leader",
            &region,
            from_store,
            to_store,
            OperatorKind::ADMIN,
            now,
        ))
    }

    /// Move the peer on `from_store` to `to_store`
    pub fn transfer_peer(&self, region_id: u64, from_store: u64, to_store: u64) -> Result<()> {
        let region = self.region(region_id)?;
        self.live_store(to_store)?;
        if region.store_peer(from_store).is_none() {
            return Err(rejected(region_id, format!("no peer on store {from_store}")));
        }
        if region.store_peer(to_store).is_some() {
            return Err(rejected(region_id, format!("peer already on store {to_store}")));
        }
        let cluster = self.coordinator.cluster();
        let peer = cluster.alloc_peer(to_store)?;
        self.submit(create_move_peer_operator(
            "admin-move-peer",
            &region,
            from_store,
            peer,
            OperatorKind::ADMIN,
            cluster.now(),
        ))
    }

    pub fn add_peer(&self, region_id: u64, to_store: u64) -> Result<()> {
        let region = self.region(region_id)?;
        self.live_store(to_store)?;
        if region.store_peer(to_store).is_some() {
            return Err(rejected(region_id, format!("peer already on store {to_store}")));
        }
        let cluster = self.coordinator.cluster();
        let peer = cluster.alloc_peer(to_store)?;
        self.submit(create_add_peer_operator(
            "admin-add-peer",
            &region,
            peer,
            OperatorKind::ADMIN,
            cluster.now(),
        ))
    }

    pub fn remove_peer(&self, region_id: u64, from_store: u64) -> Result<()> {
        let region = self.region(region_id)?;
        if region.store_peer(from_store).is_none() {
            return Err(rejected(region_id, format!("no peer on store {from_store}")));
        }
        let now = self.coordinator.cluster().now();
        self.submit(create_remove_peer_operator(
            "admin-remove-peer",
            &region,
            from_store,
            OperatorKind::ADMIN,
            now,
        ))
    }

    /// Abandon the in-flight operator of `region_id`
    pub fn remove_operator(&self, region_id: u64) -> Result<Operator> {
        self.region(region_id)?;
        self.coordinator
            .remove_operator(region_id)
            .ok_or_else(|| rejected(region_id, "no operator in flight".to_string()))
    }

    pub fn operator(&self, region_id: u64) -> Result<Option<Operator>> {
        self.region(region_id)?;
        Ok(self.coordinator.get_operator(region_id))
    }

    /// In-flight operators, optionally only those carrying `kind`
    pub fn operators(&self, kind: Option<OperatorKind>) -> Vec<Operator> {
        let mut ops = self.coordinator.get_operators();
        if let Some(kind) = kind {
            ops.retain(|op| op.kind().contains(kind));
        }
        ops
    }
}

fn rejected(region_id: u64, reason: String) -> PlacementError {
    PlacementError::OperatorRejected { region_id, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlacementConfig;
    use crate::namespace::DefaultClassifier;
    use crate::operator::OperatorStep;
    use placement_core::{ManualClock, MemoryIdAllocator};
    use placement_metadata::{ClusterInfo, Peer, RegionEpoch, RegionMeta, StoreMeta, StoreStats};

    fn handler() -> Handler {
        let cluster = Arc::new(ClusterInfo::new(
            Default::default(),
            Arc::new(MemoryIdAllocator::new(100)),
            ManualClock::shared(),
        ));
        for id in 1..=4 {
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
        let peers: Vec<Peer> = (1..=3).map(|s| Peer::new(10 + s, s)).collect();
        cluster.put_region(RegionInfo::new(
            RegionMeta {
                id: 1,
                start_key: vec![],
                end_key: vec![],
                epoch: RegionEpoch::new(1, 1),
                peers: peers.clone(),
            },
            Some(peers[0]),
        ));
        let coordinator = Arc::new(Coordinator::new(
            cluster,
            Arc::new(PlacementConfig::default()),
            Arc::new(DefaultClassifier),
        ));
        Handler::new(coordinator)
    }

    #[test]
    fn test_transfer_leader() {
        let h = handler();
        assert_eq!(h.transfer_leader(9, 2), Err(PlacementError::RegionNotFound(9)));
        assert!(matches!(
            h.transfer_leader(1, 4),
            Err(PlacementError::OperatorRejected { .. })
        ));
        h.transfer_leader(1, 2).unwrap();

        let op = h.operator(1).unwrap().unwrap();
        assert!(op.kind().contains(OperatorKind::ADMIN));
        assert_eq!(
            op.steps(),
            &[OperatorStep::TransferLeader {
                from_store: 1,
                to_store: 2
            }]
        );
    }

    #[test]
    fn test_transfer_peer_and_remove_operator() {
        let h = handler();
        assert_eq!(h.transfer_peer(1, 3, 5), Err(PlacementError::StoreNotFound(5)));
        h.transfer_peer(1, 3, 4).unwrap();
        assert_eq!(h.operators(Some(OperatorKind::REGION)).len(), 1);
        assert!(h.operators(Some(OperatorKind::MERGE)).is_empty());

        let removed = h.remove_operator(1).unwrap();
        assert_eq!(removed.desc(), "admin-move-peer");
        assert!(h.remove_operator(1).is_err());
        assert!(h.operator(1).unwrap().is_none());
    }

    #[test]
    fn test_add_and_remove_peer() {
        let h = handler();
        assert!(h.add_peer(1, 2).is_err());
        h.add_peer(1, 4).unwrap();
        // Admin operators do not replace each other
        assert_eq!(h.remove_peer(1, 3), Err(PlacementError::OperatorExists(1)));
        h.remove_operator(1).unwrap();
        h.remove_peer(1, 1).unwrap();
        let op = h.operator(1).unwrap().unwrap();
        assert!(matches!(op.steps()[0], OperatorStep::TransferLeader { from_store: 1, .. }));
    }
}
