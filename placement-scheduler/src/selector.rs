//! Store selectors
//!
//! Selectors combine a fixed filter list with a ranking: balance selectors
//! rank by resource usage, replica selectors by distinct score, random
//! selectors not at all. Candidates are visited in store-id order so ties
//! resolve to the lowest id.

use crate::filter::{filter_source, filter_target, Filter, Filters};
use crate::scoring::{compare_candidates, distinct_score};
use placement_metadata::StoreInfo;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::sync::Arc;

/// Resource a balance selector ranks by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Number of led regions
    Leader,
    /// Used fraction of capacity
    Storage,
}

impl ResourceKind {
    pub fn score(&self, store: &StoreInfo) -> f64 {
        match self {
            Self::Leader => store.leader_count as f64,
            Self::Storage => store.storage_ratio(),
        }
    }
}

fn passes_source(store: &StoreInfo, filters: &[Arc<dyn Filter>], extra: &[Arc<dyn Filter>]) -> bool {
    !filter_source(store, filters) && !filter_source(store, extra)
}

fn passes_target(store: &StoreInfo, filters: &[Arc<dyn Filter>], extra: &[Arc<dyn Filter>]) -> bool {
    !filter_target(store, filters) && !filter_target(store, extra)
}

fn sorted_by_id(stores: &[StoreInfo]) -> Vec<&StoreInfo> {
    let mut sorted: Vec<&StoreInfo> = stores.iter().collect();
    sorted.sort_by_key(|s| s.id());
    sorted
}

/// Picks the most loaded source and the least loaded target
pub struct BalanceSelector {
    kind: ResourceKind,
    filters: Filters,
}

impl BalanceSelector {
    pub fn new(kind: ResourceKind, filters: Filters) -> Self {
        Self { kind, filters }
    }

    pub fn select_source(&self, stores: &[StoreInfo], extra: &[Arc<dyn Filter>]) -> Option<StoreInfo> {
        let mut best: Option<(&StoreInfo, f64)> = None;
        for store in sorted_by_id(stores) {
            if !passes_source(store, &self.filters, extra) {
                continue;
            }
            let score = self.kind.score(store);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((store, score));
            }
        }
        best.map(|(store, _)| store.clone())
    }

    pub fn select_target(&self, stores: &[StoreInfo], extra: &[Arc<dyn Filter>]) -> Option<StoreInfo> {
        let mut best: Option<(&StoreInfo, f64)> = None;
        for store in sorted_by_id(stores) {
            if !passes_target(store, &self.filters, extra) {
                continue;
            }
            let score = self.kind.score(store);
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((store, score));
            }
        }
        best.map(|(store, _)| store.clone())
    }
}

/// Picks replica placement by distinct score against a region's stores
pub struct ReplicaSelector {
    labels: Vec<String>,
    filters: Filters,
}

impl ReplicaSelector {
    pub fn new(labels: Vec<String>, filters: Filters) -> Self {
        Self { labels, filters }
    }

    /// Worst-placed store among `candidates`: highest score, then highest
    /// storage ratio
    pub fn select_source(&self, candidates: &[StoreInfo], region_stores: &[StoreInfo]) -> Option<StoreInfo> {
        let mut worst: Option<(&StoreInfo, f64)> = None;
        for store in sorted_by_id(candidates) {
            if filter_source(store, &self.filters) {
                continue;
            }
            let score = distinct_score(&self.labels, region_stores, store);
            let replace = match worst {
                None => true,
                Some((w, ws)) => compare_candidates((score, store), (ws, w)) == Ordering::Greater,
            };
            if replace {
                worst = Some((store, score));
            }
        }
        worst.map(|(store, _)| store.clone())
    }

    /// Best-placed target among `candidates`: lowest score, then lowest
    /// storage ratio
    pub fn select_target(
        &self,
        candidates: &[StoreInfo],
        region_stores: &[StoreInfo],
        extra: &[Arc<dyn Filter>],
    ) -> Option<StoreInfo> {
        self.select_target_scored(candidates, region_stores, extra)
            .map(|(store, _)| store)
    }

    /// Best target together with its distinct score
    pub fn select_target_scored(
        &self,
        candidates: &[StoreInfo],
        region_stores: &[StoreInfo],
        extra: &[Arc<dyn Filter>],
    ) -> Option<(StoreInfo, f64)> {
        let mut best: Option<(&StoreInfo, f64)> = None;
        for store in sorted_by_id(candidates) {
            if !passes_target(store, &self.filters, extra) {
                continue;
            }
            let score = distinct_score(&self.labels, region_stores, store);
            let replace = match best {
                None => true,
                Some((b, bs)) => compare_candidates((score, store), (bs, b)) == Ordering::Less,
            };
            if replace {
                best = Some((store, score));
            }
        }
        best.map(|(store, score)| (store.clone(), score))
    }
}

/// Picks uniformly among the stores passing its filters
pub struct RandomSelector {
    filters: Filters,
}

impl RandomSelector {
    pub fn new(filters: Filters) -> Self {
        Self { filters }
    }

    pub fn select_source(&self, stores: &[StoreInfo], extra: &[Arc<dyn Filter>]) -> Option<StoreInfo> {
        let eligible: Vec<&StoreInfo> = stores
            .iter()
            .filter(|s| passes_source(s, &self.filters, extra))
            .collect();
        eligible.choose(&mut rand::thread_rng()).map(|s| (*s).clone())
    }

    pub fn select_target(&self, stores: &[StoreInfo], extra: &[Arc<dyn Filter>]) -> Option<StoreInfo> {
        let eligible: Vec<&StoreInfo> = stores
            .iter()
            .filter(|s| passes_target(s, &self.filters, extra))
            .collect();
        eligible.choose(&mut rand::thread_rng()).map(|s| (*s).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ExcludedFilter;
    use placement_metadata::{StoreLabel, StoreMeta, StoreStats};

    fn store(id: u64, zone: &str, leaders: usize, used: u64) -> StoreInfo {
        StoreInfo::new(StoreMeta {
            id,
            labels: vec![StoreLabel::new("zone", zone)],
            ..Default::default()
        })
        .with_leader_count(leaders)
        .with_stats(StoreStats {
            store_id: id,
            capacity: 100,
            available: 100 - used,
            ..Default::default()
        })
    }

    #[test]
    fn test_balance_selector_extremes() {
        let stores = vec![store(1, "z1", 6, 10), store(2, "z1", 9, 50), store(3, "z2", 9, 90)];
        let selector = BalanceSelector::new(ResourceKind::Leader, vec![]);
        assert_eq!(selector.select_source(&stores, &[]).map(|s| s.id()), Some(2));
        assert_eq!(selector.select_target(&stores, &[]).map(|s| s.id()), Some(1));

        let selector = BalanceSelector::new(ResourceKind::Storage, vec![]);
        assert_eq!(selector.select_source(&stores, &[]).map(|s| s.id()), Some(3));

        let exclude: Vec<Arc<dyn Filter>> = vec![Arc::new(ExcludedFilter::new([3], [1]))];
        assert_eq!(selector.select_source(&stores, &exclude).map(|s| s.id()), Some(2));
        assert_eq!(selector.select_target(&stores, &exclude).map(|s| s.id()), Some(2));
    }

    #[test]
    fn test_replica_selector_prefers_distinct_then_storage() {
        let labels = vec!["zone".to_string()];
        let region_stores = vec![store(1, "z1", 0, 0), store(2, "z2", 0, 0)];
        let candidates = vec![
            store(3, "z1", 0, 10),
            store(4, "z3", 0, 60),
            store(5, "z3", 0, 40),
        ];
        let selector = ReplicaSelector::new(labels, vec![]);
        let (best, score) = selector
            .select_target_scored(&candidates, &region_stores, &[])
            .unwrap();
        assert_eq!(best.id(), 5);
        assert_eq!(score, 0.0);

        let worst = selector.select_source(&candidates, &region_stores).unwrap();
        assert_eq!(worst.id(), 3);
    }

    #[test]
    fn test_random_selector_respects_filters() {
        let stores = vec![store(1, "z1", 0, 0), store(2, "z1", 0, 0)];
        let selector = RandomSelector::new(vec![Arc::new(ExcludedFilter::new([], [1]))]);
        for _ in 0..10 {
            assert_eq!(selector.select_target(&stores, &[]).map(|s| s.id()), Some(2));
        }
        assert!(selector.select_source(&stores, &[]).is_some());
    }
}
