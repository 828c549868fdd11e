//! Placement Metadata
//!
//! The topology cache of the placement scheduler: stores and regions as
//! reported by heartbeats, the key-range region index, hot-region stats and
//! the persistence interface behind them.

pub mod cluster;
pub mod hot;
pub mod metrics;
pub mod models;
pub mod region;
pub mod snapshot;
pub mod storage;
pub mod store;

pub use cluster::{ClusterInfo, ClusterMeta, RegionHeartbeatOutcome};
pub use hot::{FlowKind, HotCache, HotStat, HotThresholds};
pub use models::{
    Peer, PeerStats, RegionEpoch, RegionMeta, StoreLabel, StoreMeta, StoreState, StoreStats,
};
pub use region::{RegionInfo, RegionsInfo, StoreRegionStats};
pub use snapshot::{RegionSnapshot, StoreSnapshot, TopologySnapshot};
pub use storage::{MemoryStorage, MetaStorage};
pub use store::{StoreInfo, StoresInfo};
