//! Cluster metadata models
//!
//! These structs mirror what stores report in heartbeats and what is
//! persisted through [`crate::storage::MetaStorage`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// One replica of a region, located on one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Peer {
    pub id: u64,
    pub store_id: u64,
    /// Non-voting replica
    #[serde(default)]
    pub is_learner: bool,
}

impl Peer {
    /// Voting peer
    pub fn new(id: u64, store_id: u64) -> Self {
        Self {
            id,
            store_id,
            is_learner: false,
        }
    }

    /// Non-voting peer
    pub fn learner(id: u64, store_id: u64) -> Self {
        Self {
            id,
            store_id,
            is_learner: true,
        }
    }
}

/// A peer reported unreachable by the region leader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    pub peer: Peer,
    pub down_seconds: u64,
}

/// Optimistic-concurrency fence for region metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegionEpoch {
    /// Bumped on split and merge
    pub version: u64,
    /// Bumped on membership change
    pub conf_ver: u64,
}

impl RegionEpoch {
    pub fn new(version: u64, conf_ver: u64) -> Self {
        Self { version, conf_ver }
    }

    /// Strictly older than `cached` on either component
    pub fn is_stale_against(&self, cached: &RegionEpoch) -> bool {
        self.version < cached.version || self.conf_ver < cached.conf_ver
    }
}

impl fmt::Display for RegionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ver: {}, conf_ver: {}}}", self.version, self.conf_ver)
    }
}

/// Durable part of a region
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegionMeta {
    pub id: u64,
    /// Inclusive start key, empty means unbounded
    #[serde(default)]
    pub start_key: Vec<u8>,
    /// Exclusive end key, empty means unbounded
    #[serde(default)]
    pub end_key: Vec<u8>,
    #[serde(default)]
    pub epoch: RegionEpoch,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

/// Store lifecycle state. Transitions only move toward `Tombstone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreState {
    #[default]
    Up,
    /// Decommissioning; its peers are being moved away
    Offline,
    /// Removed for good
    Tombstone,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Offline => write!(f, "offline"),
            Self::Tombstone => write!(f, "tombstone"),
        }
    }
}

/// Location label such as `zone=z1`. Keys and values compare ASCII
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreLabel {
    pub key: String,
    pub value: String,
}

impl StoreLabel {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Durable part of a store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreMeta {
    pub id: u64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub labels: Vec<StoreLabel>,
    #[serde(default)]
    pub state: StoreState,
}

impl StoreMeta {
    /// Value of a location label
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.key.eq_ignore_ascii_case(key))
            .map(|l| l.value.as_str())
    }
}

/// Status block carried by a store heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub store_id: u64,
    /// Total capacity in bytes
    pub capacity: u64,
    /// Free space in bytes
    pub available: u64,
    /// Region count as seen by the store itself
    pub region_count: u64,
    /// Leader count as seen by the store itself
    pub leader_count: u64,
    pub sending_snap_count: u64,
    pub receiving_snap_count: u64,
    pub applying_snap_count: u64,
    pub is_busy: bool,
}
