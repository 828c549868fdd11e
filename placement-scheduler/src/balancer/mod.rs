//! Balance schedulers
//!
//! Unlike checkers, schedulers are not driven by heartbeats. Each runs in
//! its own coordinator loop and samples the topology cache for the most
//! imbalanced pair of stores.

mod leader;
mod storage;

pub use leader::LeaderBalancer;
pub use storage::StorageBalancer;

use crate::operator::{Operator, OperatorKind};
use placement_core::TtlCache;
use placement_metadata::ClusterInfo;
use std::sync::Arc;
use std::time::Duration;

/// A periodically run scheduling strategy
pub trait Scheduler: Send + Sync {
    /// Unique name, used as the registration key
    fn name(&self) -> &str;

    /// Resource whose in-flight limit gates this scheduler: `LEADER` or
    /// `REGION`
    fn resource_kind(&self) -> OperatorKind;

    /// Interval between runs when the scheduler keeps finding work
    fn min_interval(&self) -> Duration;

    /// At most one operator per call
    fn schedule(&self, cluster: &ClusterInfo) -> Option<Operator>;

    /// Caches the coordinator should sweep periodically
    fn ttl_caches(&self) -> Vec<Arc<TtlCache>> {
        Vec::new()
    }
}
