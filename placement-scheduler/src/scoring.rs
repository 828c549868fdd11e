//! Replica placement scoring
//!
//! The distinct score measures how much a candidate store shares its
//! location with the stores already holding a region. Lower is better: a
//! store in a zone no other replica uses scores lower than one sharing
//! zone, rack and host with an existing replica.

use crate::config::{LabelConstraint, ReplicationConfig};
use placement_metadata::StoreInfo;
use std::cmp::Ordering;

/// Weight ratio between adjacent label levels
pub const REPLICA_BASE_SCORE: f64 = 100.0;

/// Distinct score of `candidate` against `stores`.
///
/// Label keys are walked from coarsest to finest. At level `i` every store
/// sharing the candidate's value adds `base^(n-1-i)` and stays in the set
/// compared at the next level. A label missing on either side matches.
/// Values compare ASCII case-insensitively, like label keys. The
/// candidate itself is never compared with.
pub fn distinct_score(labels: &[String], stores: &[StoreInfo], candidate: &StoreInfo) -> f64 {
    let mut matched: Vec<&StoreInfo> = stores.iter().filter(|s| s.id() != candidate.id()).collect();
    let mut score = 0.0;

    for (level, key) in labels.iter().enumerate() {
        let value = candidate.label(key);
        matched.retain(|s| same_location(s.label(key), value));
        if matched.is_empty() {
            break;
        }
        let weight = REPLICA_BASE_SCORE.powi((labels.len() - 1 - level) as i32);
        score += matched.len() as f64 * weight;
    }
    score
}

fn same_location(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => true,
    }
}

/// Order two candidates for placement: lower distinct score first, then
/// lower storage ratio
pub fn compare_candidates(a: (f64, &StoreInfo), b: (f64, &StoreInfo)) -> Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.1.storage_ratio()
                .partial_cmp(&b.1.storage_ratio())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.1.id().cmp(&b.1.id()))
}

impl ReplicationConfig {
    pub fn distinct_score(&self, stores: &[StoreInfo], candidate: &StoreInfo) -> f64 {
        distinct_score(&self.location_labels, stores, candidate)
    }

    /// Whether adding a replica on `target` keeps every label constraint
    /// satisfiable. `stores` are the stores that keep their replica.
    pub fn constraints_allow(&self, stores: &[StoreInfo], target: &StoreInfo) -> bool {
        if self.constraints.is_empty() {
            return true;
        }
        let existing: Vec<&StoreInfo> = stores.iter().filter(|s| s.id() != target.id()).collect();
        let count = |c: &LabelConstraint| existing.iter().filter(|s| c.matches(s)).count();

        match self.constraints.iter().find(|c| c.matches(target)) {
            Some(constraint) => count(constraint) < constraint.replicas,
            None => {
                let reserved: usize = self.constraints.iter().map(|c| c.replicas).sum();
                let free = existing
                    .iter()
                    .filter(|s| !self.constraints.iter().any(|c| c.matches(s)))
                    .count();
                free < self.max_replicas.saturating_sub(reserved)
            }
        }
    }
}
