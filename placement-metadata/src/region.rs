//! Region view and the region index
//!
//! [`RegionsInfo`] keeps three structures in step:
//! - id → region
//! - start key → id (the key-range tree, used for overlap and adjacency)
//! - store → leader / follower region ids (the reverse index)

use crate::models::{Peer, PeerStats, RegionEpoch, RegionMeta};
use rand::seq::IteratorRandom;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

/// Default region heartbeat interval in seconds
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 60;

/// Scheduling view of a region, as carried by a region heartbeat
#[derive(Debug, Clone, PartialEq)]
pub struct RegionInfo {
    pub meta: RegionMeta,
    pub leader: Option<Peer>,
    pub down_peers: Vec<PeerStats>,
    /// Peers not yet confirmed by Raft
    pub pending_peers: Vec<Peer>,
    /// Bytes written during the last report interval
    pub written_bytes: u64,
    /// Bytes read during the last report interval
    pub read_bytes: u64,
    /// Approximate size in MB; zero until measured
    pub approximate_size: u64,
    pub approximate_keys: u64,
    /// Length of the report interval in seconds
    pub report_interval: u64,
}

impl RegionInfo {
    pub fn new(meta: RegionMeta, leader: Option<Peer>) -> Self {
        Self {
            meta,
            leader,
            down_peers: Vec::new(),
            pending_peers: Vec::new(),
            written_bytes: 0,
            read_bytes: 0,
            approximate_size: 0,
            approximate_keys: 0,
            report_interval: DEFAULT_REPORT_INTERVAL_SECS,
        }
    }

    pub fn with_down_peers(mut self, down_peers: Vec<PeerStats>) -> Self {
        self.down_peers = down_peers;
        self
    }

    pub fn with_pending_peers(mut self, pending_peers: Vec<Peer>) -> Self {
        self.pending_peers = pending_peers;
        self
    }

    pub fn with_approximate_size(mut self, size: u64, keys: u64) -> Self {
        self.approximate_size = size;
        self.approximate_keys = keys;
        self
    }

    pub fn with_flow(mut self, written_bytes: u64, read_bytes: u64) -> Self {
        self.written_bytes = written_bytes;
        self.read_bytes = read_bytes;
        self
    }

    pub fn with_epoch(mut self, epoch: RegionEpoch) -> Self {
        self.meta.epoch = epoch;
        self
    }

    pub fn with_leader(mut self, leader: Option<Peer>) -> Self {
        self.leader = leader;
        self
    }

    /// Copy of this region without the peer on `store_id`
    pub fn without_store_peer(&self, store_id: u64) -> Self {
        let mut region = self.clone();
        region.meta.peers.retain(|p| p.store_id != store_id);
        region.down_peers.retain(|d| d.peer.store_id != store_id);
        region.pending_peers.retain(|p| p.store_id != store_id);
        if region.leader.map(|l| l.store_id) == Some(store_id) {
            region.leader = None;
        }
        region
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn start_key(&self) -> &[u8] {
        &self.meta.start_key
    }

    pub fn end_key(&self) -> &[u8] {
        &self.meta.end_key
    }

    pub fn epoch(&self) -> RegionEpoch {
        self.meta.epoch
    }

    pub fn peers(&self) -> &[Peer] {
        &self.meta.peers
    }

    pub fn leader(&self) -> Option<&Peer> {
        self.leader.as_ref()
    }

    pub fn leader_store_id(&self) -> Option<u64> {
        self.leader.map(|l| l.store_id)
    }

    pub fn peer(&self, peer_id: u64) -> Option<&Peer> {
        self.meta.peers.iter().find(|p| p.id == peer_id)
    }

    pub fn store_peer(&self, store_id: u64) -> Option<&Peer> {
        self.meta.peers.iter().find(|p| p.store_id == store_id)
    }

    /// Voting peers
    pub fn voters(&self) -> Vec<&Peer> {
        self.meta.peers.iter().filter(|p| !p.is_learner).collect()
    }

    pub fn learners(&self) -> Vec<&Peer> {
        self.meta.peers.iter().filter(|p| p.is_learner).collect()
    }

    /// Voting peers other than the leader
    pub fn followers(&self) -> Vec<&Peer> {
        let leader_id = self.leader.map(|l| l.id);
        self.meta
            .peers
            .iter()
            .filter(|p| !p.is_learner && Some(p.id) != leader_id)
            .collect()
    }

    pub fn store_ids(&self) -> BTreeSet<u64> {
        self.meta.peers.iter().map(|p| p.store_id).collect()
    }

    pub fn follower_store_ids(&self) -> BTreeSet<u64> {
        self.followers().iter().map(|p| p.store_id).collect()
    }

    pub fn pending_peer(&self, peer_id: u64) -> Option<&Peer> {
        self.pending_peers.iter().find(|p| p.id == peer_id)
    }

    pub fn down_peer(&self, peer_id: u64) -> Option<&PeerStats> {
        self.down_peers.iter().find(|d| d.peer.id == peer_id)
    }

    /// Any down, pending or learner peer
    pub fn has_unhealthy_peer(&self) -> bool {
        !self.down_peers.is_empty() || !self.pending_peers.is_empty() || !self.learners().is_empty()
    }

    /// Whether the start key sorts before the end key. An empty end key
    /// is unbounded.
    pub fn has_valid_range(&self) -> bool {
        self.end_key().is_empty() || self.start_key() < self.end_key()
    }

    /// Whether this range lies inside `other` and is strictly smaller
    pub fn is_shrunk_from(&self, other: &RegionInfo) -> bool {
        let starts_inside = self.start_key() >= other.start_key();
        let ends_inside = other.end_key().is_empty()
            || (!self.end_key().is_empty() && self.end_key() <= other.end_key());
        let same = self.start_key() == other.start_key() && self.end_key() == other.end_key();
        starts_inside && ends_inside && !same
    }

    /// Whether the key range contains `key`
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= self.start_key() && (self.end_key().is_empty() || key < self.end_key())
    }
}

/// Region-derived totals of one store
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreRegionStats {
    pub leader_count: usize,
    pub region_count: usize,
    pub pending_peer_count: usize,
    pub leader_size: u64,
    pub region_size: u64,
}

impl StoreRegionStats {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Region index with key-range tree and per-store reverse index
#[derive(Debug, Default, Clone)]
pub struct RegionsInfo {
    regions: HashMap<u64, RegionInfo>,
    tree: BTreeMap<Vec<u8>, u64>,
    leaders: HashMap<u64, BTreeSet<u64>>,
    followers: HashMap<u64, BTreeSet<u64>>,
    /// Kept in step with `index`/`unindex` so counters never need a rescan
    store_stats: HashMap<u64, StoreRegionStats>,
}

impl RegionsInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<&RegionInfo> {
        self.regions.get(&id)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Regions in key order
    pub fn iter(&self) -> impl Iterator<Item = &RegionInfo> {
        self.tree.values().filter_map(|id| self.regions.get(id))
    }

    /// Insert or replace a region, dropping every region its range now
    /// overlaps. Returns the dropped regions.
    pub fn put(&mut self, region: RegionInfo) -> Vec<RegionInfo> {
        self.remove(region.id());

        let mut overlaps = Vec::new();
        for id in self.overlapping_ids(region.start_key(), region.end_key()) {
            if let Some(old) = self.remove(id) {
                overlaps.push(old);
            }
        }

        self.tree.insert(region.start_key().to_vec(), region.id());
        self.index(&region);
        self.regions.insert(region.id(), region);
        overlaps
    }

    /// Remove a region and its index entries
    pub fn remove(&mut self, id: u64) -> Option<RegionInfo> {
        let region = self.regions.remove(&id)?;
        if self.tree.get(region.start_key()) == Some(&id) {
            self.tree.remove(region.start_key());
        }
        self.unindex(&region);
        Some(region)
    }

    /// Cached regions whose range intersects `[start, end)`
    pub fn overlaps(&self, start: &[u8], end: &[u8]) -> Vec<&RegionInfo> {
        self.overlapping_ids(start, end)
            .into_iter()
            .filter_map(|id| self.regions.get(&id))
            .collect()
    }

    fn overlapping_ids(&self, start: &[u8], end: &[u8]) -> Vec<u64> {
        let mut ids = Vec::new();
        // Empty or inverted ranges overlap nothing
        if !end.is_empty() && end <= start {
            return ids;
        }

        // The region starting at or before `start` may still cover it
        if let Some((_, id)) = self.tree.range(..=start.to_vec()).next_back() {
            if let Some(r) = self.regions.get(id) {
                if r.end_key().is_empty() || r.end_key() > start {
                    ids.push(*id);
                }
            }
        }

        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end.to_vec())
        };
        for (_, id) in self
            .tree
            .range::<Vec<u8>, _>((Bound::Excluded(start.to_vec()), upper))
        {
            ids.push(*id);
        }
        ids
    }

    /// Region containing `key`
    pub fn search(&self, key: &[u8]) -> Option<&RegionInfo> {
        let (_, id) = self.tree.range(..=key.to_vec()).next_back()?;
        self.regions.get(id).filter(|r| r.contains_key(key))
    }

    /// Regions immediately before and after `region` in key order
    pub fn adjacent(&self, region: &RegionInfo) -> (Option<&RegionInfo>, Option<&RegionInfo>) {
        let prev = if region.start_key().is_empty() {
            None
        } else {
            self.tree
                .range(..region.start_key().to_vec())
                .next_back()
                .and_then(|(_, id)| self.regions.get(id))
                .filter(|r| r.end_key() == region.start_key())
        };
        let next = if region.end_key().is_empty() {
            None
        } else {
            self.tree
                .get(region.end_key())
                .and_then(|id| self.regions.get(id))
        };
        (prev, next)
    }

    pub fn leader_region_ids(&self, store_id: u64) -> Vec<u64> {
        self.leaders
            .get(&store_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn follower_region_ids(&self, store_id: u64) -> Vec<u64> {
        self.followers
            .get(&store_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Random region led by `store_id` that satisfies `accept`
    pub fn random_leader_region<F>(&self, store_id: u64, accept: F) -> Option<&RegionInfo>
    where
        F: Fn(&RegionInfo) -> bool,
    {
        Self::random_from(&self.regions, self.leaders.get(&store_id), accept)
    }

    /// Random region with a non-leader peer on `store_id` that satisfies `accept`
    pub fn random_follower_region<F>(&self, store_id: u64, accept: F) -> Option<&RegionInfo>
    where
        F: Fn(&RegionInfo) -> bool,
    {
        Self::random_from(&self.regions, self.followers.get(&store_id), accept)
    }

    fn random_from<'a, F>(
        regions: &'a HashMap<u64, RegionInfo>,
        ids: Option<&BTreeSet<u64>>,
        accept: F,
    ) -> Option<&'a RegionInfo>
    where
        F: Fn(&RegionInfo) -> bool,
    {
        let ids = ids?;
        ids.iter()
            .filter_map(|id| regions.get(id))
            .filter(|&r| accept(r))
            .choose(&mut rand::thread_rng())
    }

    /// Region-derived totals of `store_id`
    pub fn store_stats(&self, store_id: u64) -> StoreRegionStats {
        self.store_stats.get(&store_id).copied().unwrap_or_default()
    }

    pub fn store_leader_count(&self, store_id: u64) -> usize {
        self.store_stats(store_id).leader_count
    }

    pub fn store_region_count(&self, store_id: u64) -> usize {
        self.store_stats(store_id).region_count
    }

    pub fn store_leader_size(&self, store_id: u64) -> u64 {
        self.store_stats(store_id).leader_size
    }

    pub fn store_region_size(&self, store_id: u64) -> u64 {
        self.store_stats(store_id).region_size
    }

    pub fn store_pending_peer_count(&self, store_id: u64) -> usize {
        self.store_stats(store_id).pending_peer_count
    }

    fn index(&mut self, region: &RegionInfo) {
        let leader_id = region.leader.map(|l| l.id);
        let size = region.approximate_size;
        for peer in region.peers() {
            let is_leader = Some(peer.id) == leader_id;
            let index = if is_leader {
                &mut self.leaders
            } else {
                &mut self.followers
            };
            if !index.entry(peer.store_id).or_default().insert(region.id()) {
                continue;
            }

            let stats = self.store_stats.entry(peer.store_id).or_default();
            stats.region_count += 1;
            stats.region_size += size;
            if is_leader {
                stats.leader_count += 1;
                stats.leader_size += size;
            }
            if region.pending_peers.iter().any(|p| p.store_id == peer.store_id) {
                stats.pending_peer_count += 1;
            }
        }
    }

    /// Reverse of [`Self::index`] for the region as it was indexed
    fn unindex(&mut self, region: &RegionInfo) {
        let leader_id = region.leader.map(|l| l.id);
        let size = region.approximate_size;
        for peer in region.peers() {
            let is_leader = Some(peer.id) == leader_id;
            let index = if is_leader {
                &mut self.leaders
            } else {
                &mut self.followers
            };
            let Some(ids) = index.get_mut(&peer.store_id) else {
                continue;
            };
            let removed = ids.remove(&region.id());
            if ids.is_empty() {
                index.remove(&peer.store_id);
            }
            if !removed {
                continue;
            }

            if let Some(stats) = self.store_stats.get_mut(&peer.store_id) {
                stats.region_count = stats.region_count.saturating_sub(1);
                stats.region_size = stats.region_size.saturating_sub(size);
                if is_leader {
                    stats.leader_count = stats.leader_count.saturating_sub(1);
                    stats.leader_size = stats.leader_size.saturating_sub(size);
                }
                if region.pending_peers.iter().any(|p| p.store_id == peer.store_id) {
                    stats.pending_peer_count = stats.pending_peer_count.saturating_sub(1);
                }
                if stats.is_empty() {
                    self.store_stats.remove(&peer.store_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_region(id: u64, start: &str, end: &str, stores: &[u64], leader_store: u64) -> RegionInfo {
        let peers: Vec<Peer> = stores
            .iter()
            .map(|s| Peer::new(id * 100 + s, *s))
            .collect();
        let leader = peers.iter().find(|p| p.store_id == leader_store).copied();
        RegionInfo::new(
            RegionMeta {
                id,
                start_key: start.as_bytes().to_vec(),
                end_key: end.as_bytes().to_vec(),
                epoch: RegionEpoch::new(1, 1),
                peers,
            },
            leader,
        )
    }

    #[test]
    fn test_put_and_index() {
        let mut regions = RegionsInfo::new();
        regions.put(make_region(1, "", "b", &[1, 2, 3], 1));
        regions.put(make_region(2, "b", "", &[1, 2, 3], 2));

        assert_eq!(regions.len(), 2);
        assert_eq!(regions.store_leader_count(1), 1);
        assert_eq!(regions.store_leader_count(2), 1);
        assert_eq!(regions.store_leader_count(3), 0);
        assert_eq!(regions.store_region_count(3), 2);
        assert_eq!(regions.leader_region_ids(2), vec![2]);
        assert_eq!(regions.follower_region_ids(3), vec![1, 2]);
    }

    #[test]
    fn test_leader_change_updates_index() {
        let mut regions = RegionsInfo::new();
        regions.put(make_region(1, "", "", &[1, 2, 3], 1));
        regions.put(make_region(1, "", "", &[1, 2, 3], 3));
        assert_eq!(regions.store_leader_count(1), 0);
        assert_eq!(regions.store_leader_count(3), 1);
        assert_eq!(regions.store_region_count(1), 1);
    }

    #[test]
    fn test_split_then_merge_overlaps() {
        let mut regions = RegionsInfo::new();
        regions.put(make_region(1, "a", "z", &[1, 2, 3], 1));

        // Split: region 1 shrinks to [a, m), region 2 takes [m, z)
        regions.put(make_region(1, "a", "m", &[1, 2, 3], 1));
        let overlaps = regions.put(make_region(2, "m", "z", &[1, 2, 3], 1));
        assert!(overlaps.is_empty());
        assert_eq!(regions.len(), 2);

        // Merge: region 1 grows back over [a, z), region 2 is swallowed
        let overlaps = regions.put(make_region(1, "a", "z", &[1, 2, 3], 1));
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].id(), 2);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions.store_leader_count(1), 1);
    }

    #[test]
    fn test_overlap_with_region_starting_before() {
        let mut regions = RegionsInfo::new();
        regions.put(make_region(1, "a", "k", &[1], 1));
        regions.put(make_region(2, "k", "", &[1], 1));

        let hits: Vec<u64> = regions.overlaps(b"c", b"m").iter().map(|r| r.id()).collect();
        assert_eq!(hits, vec![1, 2]);

        let hits: Vec<u64> = regions.overlaps(b"k", b"l").iter().map(|r| r.id()).collect();
        assert_eq!(hits, vec![2]);

        assert!(regions.overlaps(b"", b"a").is_empty());
    }

    #[test]
    fn test_search_and_adjacent() {
        let mut regions = RegionsInfo::new();
        regions.put(make_region(1, "", "g", &[1], 1));
        regions.put(make_region(2, "g", "p", &[1], 1));
        regions.put(make_region(3, "p", "", &[1], 1));

        assert_eq!(regions.search(b"a").map(|r| r.id()), Some(1));
        assert_eq!(regions.search(b"g").map(|r| r.id()), Some(2));
        assert_eq!(regions.search(b"zzz").map(|r| r.id()), Some(3));

        let middle = regions.get(2).unwrap().clone();
        let (prev, next) = regions.adjacent(&middle);
        assert_eq!(prev.map(|r| r.id()), Some(1));
        assert_eq!(next.map(|r| r.id()), Some(3));

        let first = regions.get(1).unwrap().clone();
        let (prev, next) = regions.adjacent(&first);
        assert!(prev.is_none());
        assert_eq!(next.map(|r| r.id()), Some(2));
    }

    #[test]
    fn test_random_leader_region_respects_predicate() {
        let mut regions = RegionsInfo::new();
        regions.put(make_region(1, "", "b", &[1, 2], 1));
        regions.put(make_region(2, "b", "c", &[1, 3], 1));

        for _ in 0..20 {
            let picked = regions
                .random_leader_region(1, |r| r.store_peer(3).is_some())
                .unwrap();
            assert_eq!(picked.id(), 2);
        }
        assert!(regions.random_leader_region(2, |_| true).is_none());
        assert_eq!(
            regions.random_follower_region(2, |_| true).map(|r| r.id()),
            Some(1)
        );
    }

    #[test]
    fn test_pending_peer_count_and_sizes() {
        let mut regions = RegionsInfo::new();
        let region = make_region(1, "", "", &[1, 2, 3], 1).with_approximate_size(64, 1000);
        let pending = region.store_peer(3).copied().unwrap();
        regions.put(region.with_pending_peers(vec![pending]));

        assert_eq!(regions.store_pending_peer_count(3), 1);
        assert_eq!(regions.store_pending_peer_count(2), 0);
        assert_eq!(regions.store_leader_size(1), 64);
        assert_eq!(regions.store_region_size(2), 64);
    }

    #[test]
    fn test_store_stats_follow_updates() {
        let mut regions = RegionsInfo::new();
        regions.put(make_region(1, "", "m", &[1, 2, 3], 1).with_approximate_size(10, 100));
        regions.put(make_region(2, "m", "", &[1, 2, 3], 1).with_approximate_size(20, 200));
        assert_eq!(
            regions.store_stats(1),
            StoreRegionStats {
                leader_count: 2,
                region_count: 2,
                pending_peer_count: 0,
                leader_size: 30,
                region_size: 30,
            }
        );

        // Leader moves to store 2, size grows, store 3 falls behind
        let mut moved = make_region(2, "m", "", &[1, 2, 3], 2).with_approximate_size(25, 250);
        moved.pending_peers = vec![moved.store_peer(3).copied().unwrap()];
        regions.put(moved);

        assert_eq!(regions.store_leader_count(1), 1);
        assert_eq!(regions.store_leader_size(1), 10);
        assert_eq!(regions.store_region_size(1), 35);
        assert_eq!(regions.store_leader_count(2), 1);
        assert_eq!(regions.store_leader_size(2), 25);
        assert_eq!(regions.store_pending_peer_count(3), 1);

        // Peer on store 3 removed, then the whole region dropped
        regions.put(make_region(2, "m", "", &[1, 2], 2).with_approximate_size(25, 250));
        assert_eq!(regions.store_pending_peer_count(3), 0);
        assert_eq!(regions.store_region_count(3), 1);
        regions.remove(1);
        regions.remove(2);
        for store in 1..=3 {
            assert_eq!(regions.store_stats(store), StoreRegionStats::default());
        }
    }

    #[test]
    fn test_invalid_ranges_overlap_nothing() {
        let mut regions = RegionsInfo::new();
        regions.put(make_region(1, "", "", &[1], 1));

        assert!(regions.overlaps(b"x", b"x").is_empty());
        assert!(regions.overlaps(b"x", b"a").is_empty());
        assert!(!make_region(2, "x", "x", &[1], 1).has_valid_range());
        assert!(!make_region(2, "x", "a", &[1], 1).has_valid_range());
        assert!(make_region(2, "x", "", &[1], 1).has_valid_range());
    }

    #[test]
    fn test_is_shrunk_from() {
        let whole = make_region(1, "", "", &[1], 1);
        let left = make_region(1, "", "m", &[1], 1);
        let right = make_region(1, "m", "", &[1], 1);
        let middle = make_region(1, "g", "p", &[1], 1);

        assert!(left.is_shrunk_from(&whole));
        assert!(right.is_shrunk_from(&whole));
        assert!(!whole.is_shrunk_from(&left));
        assert!(!whole.is_shrunk_from(&whole));
        assert!(!right.is_shrunk_from(&middle));
        assert!(!middle.is_shrunk_from(&right));
        assert!(make_region(1, "g", "k", &[1], 1).is_shrunk_from(&middle));
    }

    #[test]
    fn test_region_peer_helpers() {
        let mut region = make_region(1, "", "", &[1, 2, 3], 1);
        region.meta.peers.push(Peer::learner(199, 4));

        assert_eq!(region.voters().len(), 3);
        assert_eq!(region.learners().len(), 1);
        assert_eq!(region.followers().len(), 2);
        assert!(region.has_unhealthy_peer());

        let trimmed = region.without_store_peer(1);
        assert!(trimmed.leader.is_none());
        assert_eq!(trimmed.peers().len(), 3);
    }
}
