//! Hot region statistics
//!
//! Each region heartbeat carries the bytes written and read during its
//! report interval. A region whose flow stays above the threshold for
//! several consecutive reports becomes hot; the merge checker leaves hot
//! regions alone.

use crate::region::RegionInfo;
use std::collections::HashMap;

/// Flow direction being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Write,
    Read,
}

/// Thresholds deciding when a region counts as hot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HotThresholds {
    /// Minimum write rate (bytes/s)
    pub min_write_rate: u64,
    /// Minimum read rate (bytes/s)
    pub min_read_rate: u64,
    /// Consecutive hot reports before a region is considered hot
    pub hits_threshold: u32,
}

impl Default for HotThresholds {
    fn default() -> Self {
        Self {
            min_write_rate: 16 * 1024,
            min_read_rate: 128 * 1024,
            hits_threshold: 3,
        }
    }
}

/// Flow stats for one region in one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotStat {
    pub region_id: u64,
    pub store_id: u64,
    /// Bytes/s over the last report interval
    pub flow_rate: u64,
    /// Consecutive reports at or above the threshold
    pub hot_degree: u32,
}

/// Per-direction flow statistics keyed by region id
#[derive(Debug, Default)]
pub struct HotCache {
    write: HashMap<u64, HotStat>,
    read: HashMap<u64, HotStat>,
    thresholds: HotThresholds,
}

impl HotCache {
    pub fn new(thresholds: HotThresholds) -> Self {
        Self {
            write: HashMap::new(),
            read: HashMap::new(),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> HotThresholds {
        self.thresholds
    }

    /// Fold one heartbeat's flow into the statistics
    pub fn update(&mut self, region: &RegionInfo) {
        let interval = region.report_interval.max(1);
        let store_id = region.leader_store_id().unwrap_or(0);
        Self::update_flow(
            &mut self.write,
            region.id(),
            store_id,
            region.written_bytes / interval,
            self.thresholds.min_write_rate,
        );
        Self::update_flow(
            &mut self.read,
            region.id(),
            store_id,
            region.read_bytes / interval,
            self.thresholds.min_read_rate,
        );
    }

    fn update_flow(
        stats: &mut HashMap<u64, HotStat>,
        region_id: u64,
        store_id: u64,
        rate: u64,
        min_rate: u64,
    ) {
        if rate >= min_rate {
            let stat = stats.entry(region_id).or_insert(HotStat {
                region_id,
                store_id,
                flow_rate: rate,
                hot_degree: 0,
            });
            stat.store_id = store_id;
            stat.flow_rate = rate;
            stat.hot_degree = stat.hot_degree.saturating_add(1);
            return;
        }

        // Cool down one step per cold report
        if let Some(stat) = stats.get_mut(&region_id) {
            stat.flow_rate = rate;
            stat.hot_degree = stat.hot_degree.saturating_sub(1);
            if stat.hot_degree == 0 {
                stats.remove(&region_id);
            }
        }
    }

    pub fn is_region_hot(&self, region_id: u64) -> bool {
        let threshold = self.thresholds.hits_threshold;
        [&self.write, &self.read]
            .iter()
            .any(|stats| stats.get(&region_id).is_some_and(|s| s.hot_degree >= threshold))
    }

    /// Hot regions in one direction, hottest first
    pub fn hot_regions(&self, kind: FlowKind) -> Vec<HotStat> {
        let stats = match kind {
            FlowKind::Write => &self.write,
            FlowKind::Read => &self.read,
        };
        let mut hot: Vec<HotStat> = stats
            .values()
            .filter(|s| s.hot_degree >= self.thresholds.hits_threshold)
            .copied()
            .collect();
        hot.sort_by(|a, b| b.flow_rate.cmp(&a.flow_rate).then(a.region_id.cmp(&b.region_id)));
        hot
    }

    /// Forget a region (deleted by split/merge)
    pub fn remove(&mut self, region_id: u64) {
        self.write.remove(&region_id);
        self.read.remove(&region_id);
    }
}
