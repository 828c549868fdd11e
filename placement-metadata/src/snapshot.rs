//! Serializable topology snapshot
//!
//! Lets a cluster be described in a file (stores with their status, regions
//! with their health annotations) and replayed into a [`ClusterInfo`] as if
//! the heartbeats had arrived.

use crate::cluster::ClusterInfo;
use crate::models::{Peer, PeerStats, RegionEpoch, RegionMeta, StoreMeta, StoreState, StoreStats};
use crate::region::RegionInfo;
use placement_core::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A store and its last reported status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(flatten)]
    pub meta: StoreMeta,
    #[serde(default)]
    pub capacity: u64,
    #[serde(default)]
    pub available: u64,
    #[serde(default)]
    pub sending_snap_count: u64,
    #[serde(default)]
    pub receiving_snap_count: u64,
    #[serde(default)]
    pub is_busy: bool,
}

impl StoreSnapshot {
    fn stats(&self) -> StoreStats {
        StoreStats {
            store_id: self.meta.id,
            capacity: self.capacity,
            available: self.available,
            sending_snap_count: self.sending_snap_count,
            receiving_snap_count: self.receiving_snap_count,
            is_busy: self.is_busy,
            ..Default::default()
        }
    }
}

/// A region as its leader would report it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    pub id: u64,
    #[serde(default)]
    pub start_key: String,
    #[serde(default)]
    pub end_key: String,
    #[serde(default)]
    pub epoch: RegionEpoch,
    pub peers: Vec<Peer>,
    /// Store of the leader peer
    #[serde(default)]
    pub leader_store: Option<u64>,
    #[serde(default)]
    pub down_peers: Vec<PeerStats>,
    /// Ids of peers still catching up
    #[serde(default)]
    pub pending_peers: Vec<u64>,
    #[serde(default)]
    pub approximate_size: u64,
    #[serde(default)]
    pub approximate_keys: u64,
    #[serde(default)]
    pub written_bytes: u64,
    #[serde(default)]
    pub read_bytes: u64,
}

impl RegionSnapshot {
    pub fn to_region_info(&self) -> RegionInfo {
        let leader = self
            .leader_store
            .and_then(|store| self.peers.iter().find(|p| p.store_id == store).copied());
        let pending = self
            .peers
            .iter()
            .filter(|p| self.pending_peers.contains(&p.id))
            .copied()
            .collect();
        RegionInfo::new(
            RegionMeta {
                id: self.id,
                start_key: self.start_key.as_bytes().to_vec(),
                end_key: self.end_key.as_bytes().to_vec(),
                epoch: self.epoch,
                peers: self.peers.clone(),
            },
            leader,
        )
        .with_down_peers(self.down_peers.clone())
        .with_pending_peers(pending)
        .with_approximate_size(self.approximate_size, self.approximate_keys)
        .with_flow(self.written_bytes, self.read_bytes)
    }
}

/// Stores and regions of a whole cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    #[serde(default)]
    pub stores: Vec<StoreSnapshot>,
    #[serde(default)]
    pub regions: Vec<RegionSnapshot>,
}

impl TopologySnapshot {
    /// Replay the snapshot as store and region heartbeats
    pub fn apply(&self, cluster: &ClusterInfo) -> Result<()> {
        for store in &self.stores {
            cluster.put_store(store.meta.clone())?;
            if store.meta.state != StoreState::Tombstone {
                cluster.handle_store_heartbeat(store.stats())?;
            }
        }
        for region in &self.regions {
            cluster.handle_region_heartbeat(region.to_region_info())?;
        }
        debug!(
            stores = self.stores.len(),
            regions = self.regions.len(),
            "Applied topology snapshot"
        );
        Ok(())
    }
}
