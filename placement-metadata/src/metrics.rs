//! Topology cache metrics

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Metric names as constants
pub mod names {
    pub const HEARTBEATS_TOTAL: &str = "placement_heartbeats_total";
    pub const CACHED_STORES: &str = "placement_cached_stores";
    pub const CACHED_REGIONS: &str = "placement_cached_regions";
    pub const STORAGE_ERRORS: &str = "placement_storage_errors_total";
    pub const CHANGES_DROPPED: &str = "placement_region_changes_dropped_total";
}

/// Register metric descriptions
pub fn describe() {
    describe_counter!(
        names::HEARTBEATS_TOTAL,
        "Heartbeats handled, by kind and result"
    );
    describe_gauge!(names::CACHED_STORES, "Stores in the topology cache");
    describe_gauge!(names::CACHED_REGIONS, "Regions in the topology cache");
    describe_counter!(
        names::STORAGE_ERRORS,
        "Failed best-effort metadata writes"
    );
    describe_counter!(
        names::CHANGES_DROPPED,
        "Region change notifications dropped on a full queue"
    );
}

pub(crate) fn record_heartbeat(kind: &'static str, result: &'static str) {
    counter!(names::HEARTBEATS_TOTAL, "kind" => kind, "result" => result).increment(1);
}

pub(crate) fn set_cache_sizes(stores: usize, regions: usize) {
    gauge!(names::CACHED_STORES).set(stores as f64);
    gauge!(names::CACHED_REGIONS).set(regions as f64);
}

pub(crate) fn record_storage_error(op: &'static str) {
    counter!(names::STORAGE_ERRORS, "op" => op).increment(1);
}

pub(crate) fn record_change_dropped() {
    counter!(names::CHANGES_DROPPED).increment(1);
}
