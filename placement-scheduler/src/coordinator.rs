//! Scheduling coordinator
//!
//! Owns the in-flight operator table and the scheduler loops. Region
//! heartbeats are dispatched here: checkers may admit a repair for the
//! region, then the region's operator (if any) is advanced against the
//! reported state and its next command returned to the caller.
//!
//! At most one operator is in flight per region. A new operator replaces
//! the current one only when its priority is strictly higher, and merge
//! operators are never replaced.

use crate::balancer::Scheduler;
use crate::checker::{MergeChecker, NamespaceChecker, ReplicaChecker};
use crate::config::PlacementConfig;
use crate::metrics;
use crate::namespace::Classifier;
use crate::operator::{Operator, OperatorKind, OperatorPriority, ScheduleCommand};
use futures::future::join_all;
use parking_lot::Mutex;
use placement_core::{PlacementError, Result, TtlCache};
use placement_metadata::{ClusterInfo, RegionInfo};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often expired TTL entries and abandoned operators are swept
pub const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Growth factor of a scheduler's interval after an empty run
const SCHEDULE_BACKOFF_FACTOR: f64 = 1.3;

struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Coordinator {
    cluster: Arc<ClusterInfo>,
    config: Arc<PlacementConfig>,
    replica_checker: ReplicaChecker,
    namespace_checker: NamespaceChecker,
    merge_checker: MergeChecker,
    operators: Mutex<HashMap<u64, Operator>>,
    schedulers: Mutex<HashMap<String, SchedulerHandle>>,
    ttl_caches: Mutex<Vec<Arc<TtlCache>>>,
    gc_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(
        cluster: Arc<ClusterInfo>,
        config: Arc<PlacementConfig>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        let replica_checker = ReplicaChecker::new(cluster.clone(), config.clone(), classifier.clone());
        let namespace_checker =
            NamespaceChecker::new(cluster.clone(), config.clone(), classifier.clone());
        let merge_checker = MergeChecker::new(cluster.clone(), config.clone(), classifier);
        let ttl_caches = vec![merge_checker.split_cache()];
        Self {
            cluster,
            config,
            replica_checker,
            namespace_checker,
            merge_checker,
            operators: Mutex::new(HashMap::new()),
            schedulers: Mutex::new(HashMap::new()),
            ttl_caches: Mutex::new(ttl_caches),
            gc_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn cluster(&self) -> &Arc<ClusterInfo> {
        &self.cluster
    }

    pub fn config(&self) -> &Arc<PlacementConfig> {
        &self.config
    }

    // ========================================================================
    // Heartbeat path
    // ========================================================================

    /// Fold a region heartbeat into the cache and dispatch it. Operators
    /// of regions swallowed by the reported one are dropped.
    pub fn handle_region_heartbeat(&self, region: RegionInfo) -> Result<Option<ScheduleCommand>> {
        let outcome = self.cluster.handle_region_heartbeat(region.clone())?;

        for overlap in &outcome.overlaps {
            if let Some(op) = self.take_operator(overlap.id()) {
                info!(region_id = overlap.id(), operator = %op, "Dropping operator of overlapped region");
                metrics::record_operator(op.desc(), "cancel");
            }
        }
        // Either half of a split may report first; both end up marked
        if outcome.split {
            let mut ids: Vec<u64> = outcome.overlaps.iter().map(|r| r.id()).collect();
            ids.push(region.id());
            debug!(region_ids = ?ids, "Recording region split");
            self.merge_checker.record_region_split(&ids);
        }
        Ok(self.dispatch(&region))
    }

    /// Mark regions as freshly split so they are not merged right away
    pub fn record_region_split(&self, region_ids: &[u64]) {
        self.merge_checker.record_region_split(region_ids);
    }

    /// Run the checkers for `region`, then advance its in-flight operator
    /// and return the command for the region leader, if any
    pub fn dispatch(&self, region: &RegionInfo) -> Option<ScheduleCommand> {
        self.run_checkers(region);

        let mut operators = self.operators.lock();
        let op = operators.get_mut(&region.id())?;

        if op.is_timeout(self.cluster.now()) {
            warn!(region_id = region.id(), operator = %op, "Operator timed out");
            metrics::record_operator(op.desc(), "timeout");
            operators.remove(&region.id());
            metrics::set_operators_in_flight(operators.len());
            return None;
        }

        match op.check(region).map(|step| step.command(region)) {
            Some(command) => command,
            None => {
                info!(region_id = region.id(), operator = %op, "Operator finished");
                metrics::record_operator(op.desc(), "finish");
                operators.remove(&region.id());
                metrics::set_operators_in_flight(operators.len());
                None
            }
        }
    }

    fn run_checkers(&self, region: &RegionInfo) {
        let schedule = &self.config.schedule;
        let existing = self.get_operator(region.id());

        // Only a replica fix may replace what is running, and only a low
        // priority operator that is not part of a merge
        if existing
            .as_ref()
            .is_some_and(|op| op.is_merge() || op.priority() >= OperatorPriority::Normal)
        {
            return;
        }

        if self.operator_count(OperatorKind::REPLICA) < schedule.replica_schedule_limit {
            let op = self
                .replica_checker
                .check(region)
                .or_else(|| self.namespace_checker.check(region));
            if let Some(op) = op {
                match self.add_operator(op) {
                    Ok(()) => return,
                    Err(e) => debug!(region_id = region.id(), error = %e, "Replica operator not admitted"),
                }
            }
        }

        if existing.is_none() && self.operator_count(OperatorKind::MERGE) < schedule.merge_schedule_limit {
            if let Some((active, passive)) = self.merge_checker.check(region) {
                if let Err(e) = self.add_operators(vec![active, passive]) {
                    debug!(region_id = region.id(), error = %e, "Merge operators not admitted");
                }
            }
        }
    }

    // ========================================================================
    // Operator table
    // ========================================================================

    /// Admit one operator
    pub fn add_operator(&self, op: Operator) -> Result<()> {
        self.add_operators(vec![op])
    }

    /// Admit a group of operators, all or none. Merge pairs go through
    /// here so both sides start together.
    pub fn add_operators(&self, ops: Vec<Operator>) -> Result<()> {
        let mut operators = self.operators.lock();
        for op in &ops {
            if let Err(e) = self.check_admission(&operators, op) {
                metrics::record_operator(op.desc(), "reject");
                return Err(e);
            }
        }
        for op in ops {
            if let Some(old) = operators.remove(&op.region_id()) {
                info!(region_id = op.region_id(), old = %old, new = %op, "Replacing operator");
                metrics::record_operator(old.desc(), "replace");
            }
            info!(region_id = op.region_id(), operator = %op, "Operator created");
            metrics::record_operator(op.desc(), "create");
            operators.insert(op.region_id(), op);
        }
        metrics::set_operators_in_flight(operators.len());
        Ok(())
    }

    fn check_admission(&self, operators: &HashMap<u64, Operator>, op: &Operator) -> Result<()> {
        let region_id = op.region_id();
        let rejected = |reason: String| PlacementError::OperatorRejected { region_id, reason };

        let region = self
            .cluster
            .get_region(region_id)
            .ok_or(PlacementError::RegionNotFound(region_id))?;
        if region.epoch() != op.region_epoch() {
            return Err(rejected(format!(
                "epoch changed from {} to {}",
                op.region_epoch(),
                region.epoch()
            )));
        }
        for store_id in op.target_stores() {
            match self.cluster.get_store(store_id) {
                None => return Err(PlacementError::StoreNotFound(store_id)),
                Some(store) if store.is_tombstone() => {
                    return Err(PlacementError::StoreTombstone(store_id))
                }
                Some(_) => {}
            }
        }

        if let Some(existing) = operators.get(&region_id) {
            if existing.is_merge() {
                return Err(rejected("merge in progress".to_string()));
            }
            if op.priority() <= existing.priority() {
                return Err(PlacementError::OperatorExists(region_id));
            }
        }
        Ok(())
    }

    /// Drop the operator of `region_id`, returning it
    pub fn remove_operator(&self, region_id: u64) -> Option<Operator> {
        let op = self.take_operator(region_id)?;
        info!(region_id, operator = %op, "Operator removed");
        metrics::record_operator(op.desc(), "cancel");
        Some(op)
    }

    fn take_operator(&self, region_id: u64) -> Option<Operator> {
        let mut operators = self.operators.lock();
        let op = operators.remove(&region_id);
        metrics::set_operators_in_flight(operators.len());
        op
    }

    pub fn get_operator(&self, region_id: u64) -> Option<Operator> {
        self.operators.lock().get(&region_id).cloned()
    }

    /// All in-flight operators, by region id
    pub fn get_operators(&self) -> Vec<Operator> {
        let mut ops: Vec<Operator> = self.operators.lock().values().cloned().collect();
        ops.sort_by_key(|op| op.region_id());
        ops
    }

    /// In-flight operators carrying every flag of `kind`
    pub fn operator_count(&self, kind: OperatorKind) -> u64 {
        self.operators
            .lock()
            .values()
            .filter(|op| op.kind().contains(kind))
            .count() as u64
    }

    /// Drop operators past their deadline. Regions that stopped reporting
    /// never reach the check in `dispatch`.
    pub fn collect_timed_out_operators(&self) -> usize {
        let now = self.cluster.now();
        let mut operators = self.operators.lock();
        let before = operators.len();
        operators.retain(|_, op| {
            let expired = op.is_timeout(now);
            if expired {
                warn!(region_id = op.region_id(), operator = %op, "Operator timed out");
                metrics::record_operator(op.desc(), "timeout");
            }
            !expired
        });
        metrics::set_operators_in_flight(operators.len());
        before - operators.len()
    }

    // ========================================================================
    // Scheduler loops
    // ========================================================================

    /// Whether another operator of `kind` fits under its configured limit
    pub fn allow_schedule(&self, kind: OperatorKind) -> bool {
        let schedule = &self.config.schedule;
        let limit = if kind.contains(OperatorKind::LEADER) {
            schedule.leader_schedule_limit
        } else {
            schedule.region_schedule_limit
        };
        self.operator_count(kind) < limit
    }

    /// Start a loop for `scheduler`. Names are unique.
    pub fn add_scheduler(self: &Arc<Self>, scheduler: Arc<dyn Scheduler>) -> Result<()> {
        let name = scheduler.name().to_string();
        let mut schedulers = self.schedulers.lock();
        if schedulers.contains_key(&name) {
            return Err(PlacementError::SchedulerExists(name));
        }

        self.ttl_caches.lock().extend(scheduler.ttl_caches());
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(self.clone().run_scheduler(scheduler, cancel.clone()));
        schedulers.insert(name.clone(), SchedulerHandle { cancel, task });
        metrics::set_schedulers_running(schedulers.len());
        info!(scheduler = %name, "Scheduler added");
        Ok(())
    }

    /// Stop the loop of scheduler `name` and wait for it to exit
    pub async fn remove_scheduler(&self, name: &str) -> Result<()> {
        let handle = {
            let mut schedulers = self.schedulers.lock();
            let handle = schedulers
                .remove(name)
                .ok_or_else(|| PlacementError::SchedulerNotFound(name.to_string()))?;
            metrics::set_schedulers_running(schedulers.len());
            handle
        };
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!(scheduler = name, error = %e, "Scheduler task ended abnormally");
        }
        info!(scheduler = name, "Scheduler removed");
        Ok(())
    }

    pub fn scheduler_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schedulers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    async fn run_scheduler(self: Arc<Self>, scheduler: Arc<dyn Scheduler>, cancel: CancellationToken) {
        let min_interval = scheduler.min_interval();
        let max_interval = self.config.schedule.max_schedule_interval().max(min_interval);
        let mut interval = min_interval;
        debug!(scheduler = scheduler.name(), ?min_interval, ?max_interval, "Scheduler loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if !self.allow_schedule(scheduler.resource_kind()) {
                metrics::record_scheduler(scheduler.name(), "limited");
                continue;
            }
            if self.schedule_once(scheduler.as_ref()) {
                interval = min_interval;
            } else {
                interval = next_interval(interval, max_interval);
            }
        }
        debug!(scheduler = scheduler.name(), "Scheduler loop stopped");
    }

    /// Up to `max_schedule_retries` attempts; true once an operator is admitted
    fn schedule_once(&self, scheduler: &dyn Scheduler) -> bool {
        for _ in 0..self.config.schedule.max_schedule_retries.max(1) {
            let Some(op) = scheduler.schedule(&self.cluster) else {
                continue;
            };
            match self.add_operator(op) {
                Ok(()) => return true,
                Err(e) => debug!(scheduler = scheduler.name(), error = %e, "Operator not admitted"),
            }
        }
        false
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the background sweep of TTL caches and abandoned operators
    pub fn start(self: &Arc<Self>) {
        let mut gc_task = self.gc_task.lock();
        if gc_task.is_some() {
            return;
        }
        let coordinator = self.clone();
        let cancel = self.shutdown.child_token();
        *gc_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GC_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => coordinator.collect_garbage(),
                }
            }
        }));
    }

    fn collect_garbage(&self) {
        let caches: Vec<Arc<TtlCache>> = self.ttl_caches.lock().clone();
        let expired: usize = caches.iter().map(|c| c.gc()).sum();
        let timed_out = self.collect_timed_out_operators();
        if expired > 0 || timed_out > 0 {
            debug!(expired, timed_out, "Garbage collected");
        }
    }

    /// Cancel every scheduler loop and the sweep task, waiting for them
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handles: Vec<(String, SchedulerHandle)> = self.schedulers.lock().drain().collect();
        metrics::set_schedulers_running(0);
        let (names, tasks): (Vec<String>, Vec<JoinHandle<()>>) =
            handles.into_iter().map(|(name, h)| (name, h.task)).unzip();
        for (name, result) in names.iter().zip(join_all(tasks).await) {
            if let Err(e) = result {
                warn!(scheduler = %name, error = %e, "Scheduler task ended abnormally");
            }
        }
        let gc_task = self.gc_task.lock().take();
        if let Some(task) = gc_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Sweep task ended abnormally");
            }
        }
        info!("Coordinator stopped");
    }
}

/// Interval after a run that produced nothing
pub(crate) fn next_interval(current: Duration, max: Duration) -> Duration {
    current.mul_f64(SCHEDULE_BACKOFF_FACTOR).min(max)
}
