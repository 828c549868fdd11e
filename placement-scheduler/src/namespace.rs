//! Namespace classification
//!
//! A namespace groups regions with the stores allowed to hold them. The
//! default classifier puts everything in a single namespace, which turns
//! the namespace checker and filters into no-ops.

use placement_metadata::{RegionInfo, StoreInfo};

/// Name of the catch-all namespace
pub const DEFAULT_NAMESPACE: &str = "global";

/// Maps regions and stores to namespaces
pub trait Classifier: Send + Sync {
    /// All known namespaces
    fn namespaces(&self) -> Vec<String>;

    fn region_namespace(&self, region: &RegionInfo) -> String;

    fn store_namespace(&self, store: &StoreInfo) -> String;

    /// Whether two adjacent regions may be merged
    fn allow_merge(&self, a: &RegionInfo, b: &RegionInfo) -> bool {
        self.region_namespace(a) == self.region_namespace(b)
    }
}

/// Single-namespace classifier
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl Classifier for DefaultClassifier {
    fn namespaces(&self) -> Vec<String> {
        vec![DEFAULT_NAMESPACE.to_string()]
    }

    fn region_namespace(&self, _region: &RegionInfo) -> String {
        DEFAULT_NAMESPACE.to_string()
    }

    fn store_namespace(&self, _store: &StoreInfo) -> String {
        DEFAULT_NAMESPACE.to_string()
    }

    fn allow_merge(&self, _a: &RegionInfo, _b: &RegionInfo) -> bool {
        true
    }
}
