//! Store filters
//!
//! A filter rejects stores for the source role, the target role, or both.
//! Checkers and balancers build their filter lists once and reuse them on
//! every call; per-call filters (excluded stores, replication safeguards)
//! are appended on top.

use crate::config::ReplicationConfig;
use crate::namespace::Classifier;
use placement_core::Clock;
use placement_metadata::StoreInfo;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Predicate over a store in the source or target role. `true` rejects.
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter_source(&self, store: &StoreInfo) -> bool;

    fn filter_target(&self, store: &StoreInfo) -> bool;
}

/// Shared, immutable filter list
pub type Filters = Vec<Arc<dyn Filter>>;

/// Whether any filter rejects `store` as a source
pub fn filter_source(store: &StoreInfo, filters: &[Arc<dyn Filter>]) -> bool {
    filters.iter().any(|f| {
        let rejected = f.filter_source(store);
        if rejected {
            tracing::trace!(store_id = store.id(), filter = f.name(), "Filtered source store");
        }
        rejected
    })
}

/// Whether any filter rejects `store` as a target
pub fn filter_target(store: &StoreInfo, filters: &[Arc<dyn Filter>]) -> bool {
    filters.iter().any(|f| {
        let rejected = f.filter_target(store);
        if rejected {
            tracing::trace!(store_id = store.id(), filter = f.name(), "Filtered target store");
        }
        rejected
    })
}

/// Rejects listed store ids per role
#[derive(Debug, Default)]
pub struct ExcludedFilter {
    sources: HashSet<u64>,
    targets: HashSet<u64>,
}

impl ExcludedFilter {
    pub fn new(sources: impl IntoIterator<Item = u64>, targets: impl IntoIterator<Item = u64>) -> Self {
        Self {
            sources: sources.into_iter().collect(),
            targets: targets.into_iter().collect(),
        }
    }
}

impl Filter for ExcludedFilter {
    fn name(&self) -> &'static str {
        "exclude"
    }

    fn filter_source(&self, store: &StoreInfo) -> bool {
        self.sources.contains(&store.id())
    }

    fn filter_target(&self, store: &StoreInfo) -> bool {
        self.targets.contains(&store.id())
    }
}

/// Only Up stores receive data; tombstones give nothing
#[derive(Debug, Default)]
pub struct StateFilter;

impl Filter for StateFilter {
    fn name(&self) -> &'static str {
        "state"
    }

    fn filter_source(&self, store: &StoreInfo) -> bool {
        store.is_tombstone()
    }

    fn filter_target(&self, store: &StoreInfo) -> bool {
        !store.is_up()
    }
}

/// Rejects busy and down stores, and disconnected targets
#[derive(Debug)]
pub struct HealthFilter {
    clock: Arc<dyn Clock>,
    max_down_time: Duration,
}

impl HealthFilter {
    pub fn new(clock: Arc<dyn Clock>, max_down_time: Duration) -> Self {
        Self {
            clock,
            max_down_time,
        }
    }
}

impl Filter for HealthFilter {
    fn name(&self) -> &'static str {
        "health"
    }

    fn filter_source(&self, store: &StoreInfo) -> bool {
        store.is_busy() || store.is_down(self.clock.now(), self.max_down_time)
    }

    fn filter_target(&self, store: &StoreInfo) -> bool {
        let now = self.clock.now();
        store.is_busy() || store.is_down(now, self.max_down_time) || store.is_disconnected(now)
    }
}

/// Targets above the low-space ratio receive nothing
#[derive(Debug)]
pub struct StorageThresholdFilter {
    low_space_ratio: f64,
}

impl StorageThresholdFilter {
    pub fn new(low_space_ratio: f64) -> Self {
        Self { low_space_ratio }
    }
}

impl Filter for StorageThresholdFilter {
    fn name(&self) -> &'static str {
        "storage-threshold"
    }

    fn filter_source(&self, _store: &StoreInfo) -> bool {
        false
    }

    fn filter_target(&self, store: &StoreInfo) -> bool {
        store.is_low_space(self.low_space_ratio)
    }
}

/// Stores with too many snapshots in flight
#[derive(Debug)]
pub struct SnapshotCountFilter {
    max: u64,
}

impl SnapshotCountFilter {
    pub fn new(max: u64) -> Self {
        Self { max }
    }
}

impl Filter for SnapshotCountFilter {
    fn name(&self) -> &'static str {
        "snapshot-count"
    }

    fn filter_source(&self, store: &StoreInfo) -> bool {
        store.snapshot_count() > self.max
    }

    fn filter_target(&self, store: &StoreInfo) -> bool {
        store.snapshot_count() > self.max
    }
}

/// Stores with too many peers still catching up
#[derive(Debug)]
pub struct PendingPeerCountFilter {
    max: usize,
}

impl PendingPeerCountFilter {
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl Filter for PendingPeerCountFilter {
    fn name(&self) -> &'static str {
        "pending-peer-count"
    }

    fn filter_source(&self, store: &StoreInfo) -> bool {
        store.pending_peer_count > self.max
    }

    fn filter_target(&self, store: &StoreInfo) -> bool {
        store.pending_peer_count > self.max
    }
}

/// Stores outside a namespace
pub struct NamespaceFilter {
    classifier: Arc<dyn Classifier>,
    namespace: String,
}

impl NamespaceFilter {
    pub fn new(classifier: Arc<dyn Classifier>, namespace: impl Into<String>) -> Self {
        Self {
            classifier,
            namespace: namespace.into(),
        }
    }

    fn outside(&self, store: &StoreInfo) -> bool {
        self.classifier.store_namespace(store) != self.namespace
    }
}

impl Filter for NamespaceFilter {
    fn name(&self) -> &'static str {
        "namespace"
    }

    fn filter_source(&self, store: &StoreInfo) -> bool {
        self.outside(store)
    }

    fn filter_target(&self, store: &StoreInfo) -> bool {
        self.outside(store)
    }
}

/// Targets that would place a replica less distinctly than the one being
/// replaced
pub struct DistinctScoreFilter {
    labels: Vec<String>,
    stores: Vec<StoreInfo>,
    safe_score: f64,
}

impl DistinctScoreFilter {
    /// `stores` are the region's stores; `source` is the one being moved
    pub fn new(labels: &[String], stores: &[StoreInfo], source: &StoreInfo) -> Self {
        let stores: Vec<StoreInfo> = stores.iter().filter(|s| s.id() != source.id()).cloned().collect();
        let safe_score = crate::scoring::distinct_score(labels, &stores, source);
        Self {
            labels: labels.to_vec(),
            stores,
            safe_score,
        }
    }
}

impl Filter for DistinctScoreFilter {
    fn name(&self) -> &'static str {
        "distinct"
    }

    fn filter_source(&self, _store: &StoreInfo) -> bool {
        false
    }

    fn filter_target(&self, store: &StoreInfo) -> bool {
        crate::scoring::distinct_score(&self.labels, &self.stores, store) > self.safe_score
    }
}

/// Targets that would break a label constraint
pub struct ConstraintFilter {
    replication: ReplicationConfig,
    stores: Vec<StoreInfo>,
}

impl ConstraintFilter {
    /// `stores` are the stores that keep their replica
    pub fn new(replication: &ReplicationConfig, stores: Vec<StoreInfo>) -> Self {
        Self {
            replication: replication.clone(),
            stores,
        }
    }
}

impl Filter for ConstraintFilter {
    fn name(&self) -> &'static str {
        "constraint"
    }

    fn filter_source(&self, _store: &StoreInfo) -> bool {
        false
    }

    fn filter_target(&self, store: &StoreInfo) -> bool {
        !self.replication.constraints_allow(&self.stores, store)
    }
}
