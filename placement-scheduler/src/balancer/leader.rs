use super::Scheduler;
use crate::config::PlacementConfig;
use crate::filter::{Filters, HealthFilter, StateFilter};
use crate::metrics;
use crate::operator::{create_transfer_leader_operator, Operator, OperatorKind};
use crate::selector::{BalanceSelector, ResourceKind};
use placement_metadata::ClusterInfo;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const NAME: &str = "balance-leader-scheduler";

/// Moves leadership from the store leading the most regions to the one
/// leading the fewest
pub struct LeaderBalancer {
    config: Arc<PlacementConfig>,
    selector: BalanceSelector,
}

impl LeaderBalancer {
    pub fn new(cluster: &ClusterInfo, config: Arc<PlacementConfig>) -> Self {
        let filters: Filters = vec![
            Arc::new(StateFilter),
            Arc::new(HealthFilter::new(
                cluster.clock(),
                config.schedule.max_store_down_time(),
            )),
        ];
        Self {
            config,
            selector: BalanceSelector::new(ResourceKind::Leader, filters),
        }
    }
}

impl Scheduler for LeaderBalancer {
    fn name(&self) -> &str {
        NAME
    }

    fn resource_kind(&self) -> OperatorKind {
        OperatorKind::LEADER
    }

    fn min_interval(&self) -> Duration {
        self.config.schedule.leader_schedule_interval()
    }

    fn schedule(&self, cluster: &ClusterInfo) -> Option<Operator> {
        let schedule = &self.config.schedule;
        let stores = cluster.get_stores();

        let source = self.selector.select_source(&stores, &[])?;
        let target = self.selector.select_target(&stores, &[])?;
        if source.id() == target.id() {
            return None;
        }

        // Too few leaders to be worth moving, or already close enough
        if source.leader_count < schedule.min_leader_count {
            metrics::record_scheduler(NAME, "below_min_count");
            return None;
        }
        let src = source.leader_count as f64;
        let tgt = target.leader_count as f64;
        if (src - tgt) / src < schedule.min_balance_diff_ratio {
            metrics::record_scheduler(NAME, "balanced");
            return None;
        }

        let target_id = target.id();
        let region = cluster.rand_leader_region_where(source.id(), |r| {
            r.store_peer(target_id).is_some_and(|p| {
                !p.is_learner && r.down_peer(p.id).is_none() && r.pending_peer(p.id).is_none()
            })
        });
        let Some(region) = region else {
            debug!(
                source = source.id(),
                target = target_id,
                "No region led by source with a healthy follower on target"
            );
            metrics::record_scheduler(NAME, "no_region");
            return None;
        };

        debug!(
            region_id = region.id(),
            source = source.id(),
            target = target_id,
            source_leaders = source.leader_count,
            target_leaders = target.leader_count,
            "Balancing leader"
        );
        metrics::record_scheduler(NAME, "new_operator");
        Some(create_transfer_leader_operator(
            "balance-leader",
            &region,
            source.id(),
            target_id,
            OperatorKind::BALANCE,
            cluster.now(),
        ))
    }
}
