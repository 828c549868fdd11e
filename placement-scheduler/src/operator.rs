//! Operators
//!
//! An operator is the plan for correcting one region: an ordered list of
//! steps, each with its own completion predicate evaluated against the
//! latest heartbeat. While a step is incomplete the operator yields the
//! command the region leader must execute; once every step is complete the
//! operator is finished. Operators that run past their deadline are
//! abandoned.

use placement_core::Result;
use placement_metadata::{ClusterInfo, Peer, RegionEpoch, RegionInfo, RegionMeta};
use std::fmt;
use std::ops::BitOr;
use std::time::{Duration, Instant};

/// Deadline of operators that only move leadership
pub const LEADER_OPERATOR_WAIT_TIME: Duration = Duration::from_secs(10);
/// Deadline of operators that change peers
pub const REGION_OPERATOR_WAIT_TIME: Duration = Duration::from_secs(10 * 60);

/// Classification flags of an operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperatorKind(u32);

impl OperatorKind {
    /// Moves leadership
    pub const LEADER: Self = Self(1);
    /// Changes peers
    pub const REGION: Self = Self(1 << 1);
    /// Requested by an operator of the cluster
    pub const ADMIN: Self = Self(1 << 2);
    /// Restores replica health or placement
    pub const REPLICA: Self = Self(1 << 3);
    /// Evens out load
    pub const BALANCE: Self = Self(1 << 4);
    /// Merges two regions
    pub const MERGE: Self = Self(1 << 5);
    /// Touches an adjacent region
    pub const ADJACENT: Self = Self(1 << 6);

    /// Every flag, in display order
    pub const ALL: [(Self, &'static str); 7] = [
        (Self::LEADER, "leader"),
        (Self::REGION, "region"),
        (Self::ADMIN, "admin"),
        (Self::REPLICA, "replica"),
        (Self::BALANCE, "balance"),
        (Self::MERGE, "merge"),
        (Self::ADJACENT, "adjacent"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(&self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl BitOr for OperatorKind {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::ALL
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "unknown")
        } else {
            write!(f, "{}", names.join(","))
        }
    }
}

/// Which operator wins when two target the same region
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperatorPriority {
    Low,
    Normal,
    High,
}

/// One step of an operator
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorStep {
    TransferLeader { from_store: u64, to_store: u64 },
    AddPeer { to_store: u64, peer_id: u64 },
    AddLearner { to_store: u64, peer_id: u64 },
    PromoteLearner { to_store: u64, peer_id: u64 },
    RemovePeer { from_store: u64 },
    /// Active side merges into `to_region`; the passive side waits for it
    MergeRegion {
        from_region: RegionMeta,
        to_region: RegionMeta,
        is_passive: bool,
    },
}

impl OperatorStep {
    /// Whether the step is complete in `region`
    pub fn is_finish(&self, region: &RegionInfo) -> bool {
        match self {
            Self::TransferLeader { to_store, .. } => region.leader_store_id() == Some(*to_store),
            Self::AddPeer { peer_id, .. } => {
                region.peer(*peer_id).is_some() && region.pending_peer(*peer_id).is_none()
            }
            Self::AddLearner { peer_id, .. } => {
                region.peer(*peer_id).is_some_and(|p| p.is_learner)
                    && region.pending_peer(*peer_id).is_none()
            }
            Self::PromoteLearner { peer_id, .. } => {
                region.peer(*peer_id).is_some_and(|p| !p.is_learner)
            }
            Self::RemovePeer { from_store } => region.store_peer(*from_store).is_none(),
            Self::MergeRegion {
                to_region,
                is_passive,
                ..
            } => {
                // The active side disappears into the target instead of finishing
                *is_passive
                    && (region.start_key() != to_region.start_key.as_slice()
                        || region.end_key() != to_region.end_key.as_slice())
            }
        }
    }

    /// Whether the step only moves leadership
    pub fn is_leader_step(&self) -> bool {
        matches!(self, Self::TransferLeader { .. })
    }

    /// Command for the region leader while this step is incomplete
    pub fn command(&self, region: &RegionInfo) -> Option<ScheduleCommand> {
        match self {
            Self::TransferLeader { to_store, .. } => region
                .store_peer(*to_store)
                .map(|peer| ScheduleCommand::TransferLeader { peer: *peer }),
            Self::AddPeer { to_store, peer_id } => {
                // Already added, waiting for it to catch up
                if region.peer(*peer_id).is_some() {
                    return None;
                }
                Some(ScheduleCommand::ChangePeer {
                    change_type: ChangePeerType::AddNode,
                    peer: Peer::new(*peer_id, *to_store),
                })
            }
            Self::AddLearner { to_store, peer_id } => {
                if region.peer(*peer_id).is_some() {
                    return None;
                }
                Some(ScheduleCommand::ChangePeer {
                    change_type: ChangePeerType::AddLearnerNode,
                    peer: Peer::learner(*peer_id, *to_store),
                })
            }
            Self::PromoteLearner { to_store, peer_id } => Some(ScheduleCommand::ChangePeer {
                change_type: ChangePeerType::AddNode,
                peer: Peer::new(*peer_id, *to_store),
            }),
            Self::RemovePeer { from_store } => {
                region
                    .store_peer(*from_store)
                    .map(|peer| ScheduleCommand::ChangePeer {
                        change_type: ChangePeerType::RemoveNode,
                        peer: *peer,
                    })
            }
            Self::MergeRegion {
                to_region,
                is_passive,
                ..
            } => (!is_passive).then(|| ScheduleCommand::Merge {
                target: to_region.clone(),
            }),
        }
    }
}

impl fmt::Display for OperatorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransferLeader { from_store, to_store } => {
                write!(f, "transfer leader from store {from_store} to store {to_store}")
            }
            Self::AddPeer { to_store, peer_id } => {
                write!(f, "add peer {peer_id} on store {to_store}")
            }
            Self::AddLearner { to_store, peer_id } => {
                write!(f, "add learner peer {peer_id} on store {to_store}")
            }
            Self::PromoteLearner { to_store, peer_id } => {
                write!(f, "promote learner peer {peer_id} on store {to_store} to voter")
            }
            Self::RemovePeer { from_store } => write!(f, "remove peer on store {from_store}"),
            Self::MergeRegion {
                from_region,
                to_region,
                is_passive,
            } => {
                if *is_passive {
                    write!(f, "merge region {} into region {} (passive)", from_region.id, to_region.id)
                } else {
                    write!(f, "merge region {} into region {}", from_region.id, to_region.id)
                }
            }
        }
    }
}

/// Membership change requested from the region leader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePeerType {
    AddNode,
    AddLearnerNode,
    RemoveNode,
}

/// Command returned in the region heartbeat response
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleCommand {
    TransferLeader { peer: Peer },
    ChangePeer { change_type: ChangePeerType, peer: Peer },
    Merge { target: RegionMeta },
}

/// Planned, in-flight correction of one region
#[derive(Debug, Clone)]
pub struct Operator {
    desc: String,
    region_id: u64,
    region_epoch: RegionEpoch,
    kind: OperatorKind,
    steps: Vec<OperatorStep>,
    current: usize,
    created_at: Instant,
}

impl Operator {
    /// New operator for `region`. `LEADER` or `REGION` is added to `kind`
    /// depending on whether any step changes peers.
    pub fn new(
        desc: impl Into<String>,
        region: &RegionInfo,
        kind: OperatorKind,
        steps: Vec<OperatorStep>,
        created_at: Instant,
    ) -> Self {
        let kind = if steps.iter().all(OperatorStep::is_leader_step) {
            kind | OperatorKind::LEADER
        } else {
            kind | OperatorKind::REGION
        };
        Self {
            desc: desc.into(),
            region_id: region.id(),
            region_epoch: region.epoch(),
            kind,
            steps,
            current: 0,
            created_at,
        }
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn region_id(&self) -> u64 {
        self.region_id
    }

    /// Epoch of the region when the operator was planned
    pub fn region_epoch(&self) -> RegionEpoch {
        self.region_epoch
    }

    pub fn kind(&self) -> OperatorKind {
        self.kind
    }

    pub fn steps(&self) -> &[OperatorStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn priority(&self) -> OperatorPriority {
        if self.kind.contains(OperatorKind::ADMIN) {
            OperatorPriority::High
        } else if self.kind.contains(OperatorKind::REPLICA) {
            OperatorPriority::Normal
        } else {
            OperatorPriority::Low
        }
    }

    pub fn is_merge(&self) -> bool {
        self.kind.contains(OperatorKind::MERGE)
    }

    /// Stores that receive a new peer or leadership
    pub fn target_stores(&self) -> Vec<u64> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                OperatorStep::TransferLeader { to_store, .. }
                | OperatorStep::AddPeer { to_store, .. }
                | OperatorStep::AddLearner { to_store, .. }
                | OperatorStep::PromoteLearner { to_store, .. } => Some(*to_store),
                _ => None,
            })
            .collect()
    }

    /// Advance past every leading step already complete in `region` and
    /// return the first incomplete one, or `None` once finished
    pub fn check(&mut self, region: &RegionInfo) -> Option<&OperatorStep> {
        while self.current < self.steps.len() && self.steps[self.current].is_finish(region) {
            self.current += 1;
        }
        self.steps.get(self.current)
    }

    pub fn current_step(&self) -> usize {
        self.current
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.steps.len()
    }

    pub fn timeout(&self) -> Duration {
        if self.kind.contains(OperatorKind::REGION) {
            REGION_OPERATOR_WAIT_TIME
        } else {
            LEADER_OPERATOR_WAIT_TIME
        }
    }

    pub fn is_timeout(&self, now: Instant) -> bool {
        !self.is_finished() && now.saturating_duration_since(self.created_at) > self.timeout()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<String> = self.steps.iter().map(|s| s.to_string()).collect();
        write!(
            f,
            "{} (kind: {}, region: {} {}, step: {}/{}, steps: [{}])",
            self.desc,
            self.kind,
            self.region_id,
            self.region_epoch,
            self.current,
            self.steps.len(),
            steps.join(", ")
        )
    }
}

// ============================================================================
// Operator Builders
// ============================================================================

/// Leadership move between two peers of `region`
pub fn create_transfer_leader_operator(
    desc: &str,
    region: &RegionInfo,
    from_store: u64,
    to_store: u64,
    kind: OperatorKind,
    now: Instant,
) -> Operator {
    let steps = vec![OperatorStep::TransferLeader {
        from_store,
        to_store,
    }];
    Operator::new(desc, region, kind, steps, now)
}

/// Add one voter to `region`
pub fn create_add_peer_operator(
    desc: &str,
    region: &RegionInfo,
    peer: Peer,
    kind: OperatorKind,
    now: Instant,
) -> Operator {
    let steps = vec![OperatorStep::AddPeer {
        to_store: peer.store_id,
        peer_id: peer.id,
    }];
    Operator::new(desc, region, kind, steps, now)
}

/// Remove the peer on `store_id`, moving leadership away first if needed
pub fn create_remove_peer_operator(
    desc: &str,
    region: &RegionInfo,
    store_id: u64,
    kind: OperatorKind,
    now: Instant,
) -> Operator {
    let mut steps = Vec::new();
    push_remove_steps(&mut steps, region, store_id, &[]);
    Operator::new(desc, region, kind, steps, now)
}

/// Replace the peer on `old_store` by `new_peer`: add first, then remove
pub fn create_move_peer_operator(
    desc: &str,
    region: &RegionInfo,
    old_store: u64,
    new_peer: Peer,
    kind: OperatorKind,
    now: Instant,
) -> Operator {
    let mut steps = vec![OperatorStep::AddPeer {
        to_store: new_peer.store_id,
        peer_id: new_peer.id,
    }];
    push_remove_steps(&mut steps, region, old_store, &[new_peer.store_id]);
    Operator::new(desc, region, kind, steps, now)
}

fn push_remove_steps(steps: &mut Vec<OperatorStep>, region: &RegionInfo, store_id: u64, fallback: &[u64]) {
    if region.leader_store_id() == Some(store_id) {
        let target = region
            .followers()
            .iter()
            .map(|p| p.store_id)
            .find(|s| *s != store_id)
            .or_else(|| fallback.first().copied());
        if let Some(to_store) = target {
            steps.push(OperatorStep::TransferLeader {
                from_store: store_id,
                to_store,
            });
        }
    }
    steps.push(OperatorStep::RemovePeer {
        from_store: store_id,
    });
}

/// Merge `source` into `target`. The active operator first aligns the
/// source's peers with the target's stores, then merges; the passive one
/// keeps the target busy until its range grows.
pub fn create_merge_region_operator(
    desc: &str,
    cluster: &ClusterInfo,
    source: &RegionInfo,
    target: &RegionInfo,
    kind: OperatorKind,
) -> Result<(Operator, Operator)> {
    let now = cluster.now();
    let source_stores = source.store_ids();
    let target_stores = target.store_ids();

    let mut steps = Vec::new();
    for &store_id in target_stores.difference(&source_stores) {
        let peer_id = cluster.alloc_id()?;
        steps.push(OperatorStep::AddLearner {
            to_store: store_id,
            peer_id,
        });
        steps.push(OperatorStep::PromoteLearner {
            to_store: store_id,
            peer_id,
        });
    }
    for &store_id in source_stores.difference(&target_stores) {
        if source.leader_store_id() == Some(store_id) {
            let to_store = source_stores
                .intersection(&target_stores)
                .next()
                .or_else(|| target_stores.iter().next());
            if let Some(&to_store) = to_store {
                steps.push(OperatorStep::TransferLeader {
                    from_store: store_id,
                    to_store,
                });
            }
        }
        steps.push(OperatorStep::RemovePeer {
            from_store: store_id,
        });
    }
    steps.push(OperatorStep::MergeRegion {
        from_region: source.meta.clone(),
        to_region: target.meta.clone(),
        is_passive: false,
    });

    let kind = kind | OperatorKind::MERGE;
    let active = Operator::new(desc, source, kind, steps, now);
    let passive = Operator::new(
        desc,
        target,
        kind,
        vec![OperatorStep::MergeRegion {
            from_region: source.meta.clone(),
            to_region: target.meta.clone(),
            is_passive: true,
        }],
        now,
    );
    Ok((active, passive))
}
