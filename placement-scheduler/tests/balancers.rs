//! Leader and storage balancer scenarios
//!
//! Run with: cargo test -p placement-scheduler --test balancers

mod common;

use common::TestCluster;
use placement_core::MemoryIdAllocator;
use placement_scheduler::config::LabelConstraint;
use placement_scheduler::{
    LeaderBalancer, OperatorKind, OperatorStep, PlacementConfig, ReplicationConfig, Scheduler,
    StorageBalancer,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Four stores; every region has a peer on each and is led by `leader`
fn leader_cluster(leader_counts: &[(u64, usize)]) -> (TestCluster, u64) {
    let tc = TestCluster::new();
    for id in 1..=4 {
        tc.add_store(id, &[], 50);
    }
    let mut next_id = 1;
    for &(leader, count) in leader_counts {
        for _ in 0..count {
            add_led_region(&tc, next_id, leader);
            next_id += 1;
        }
    }
    (tc, next_id)
}

fn add_led_region(tc: &TestCluster, id: u64, leader: u64) {
    let mut stores = vec![leader];
    stores.extend((1..=4).filter(|s| *s != leader));
    tc.put_region(id, &stores);
}

#[test]
fn test_leader_balance_respects_min_leader_count() {
    let (tc, next_id) = leader_cluster(&[(1, 6), (2, 7), (3, 8), (4, 9)]);
    let config = Arc::new(PlacementConfig::default());
    let balancer = LeaderBalancer::new(&tc.cluster, config);

    assert_eq!(tc.cluster.get_store(4).unwrap().leader_count, 9);
    assert!(balancer.schedule(&tc.cluster).is_none());

    // Store 4 reaches 12 leaders
    for id in next_id..next_id + 3 {
        add_led_region(&tc, id, 4);
    }
    assert_eq!(tc.cluster.get_store(4).unwrap().leader_count, 12);

    let op = balancer.schedule(&tc.cluster).unwrap();
    assert!(op.kind().contains(OperatorKind::BALANCE));
    assert!(op.kind().contains(OperatorKind::LEADER));
    assert_eq!(
        op.steps(),
        &[OperatorStep::TransferLeader {
            from_store: 4,
            to_store: 1
        }]
    );
    let region = tc.cluster.get_region(op.region_id()).unwrap();
    assert_eq!(region.leader_store_id(), Some(4));
}

#[test]
fn test_leader_balance_hysteresis() {
    let (tc, _) = leader_cluster(&[(1, 100), (2, 100), (3, 100), (4, 100)]);
    let mut config = PlacementConfig::default();
    config.schedule.min_balance_diff_ratio = 0.05;
    let balancer = LeaderBalancer::new(&tc.cluster, Arc::new(config));
    assert!(balancer.schedule(&tc.cluster).is_none());

    // 104 vs 100 is still inside the 5% band
    for id in 1000..1004 {
        add_led_region(&tc, id, 4);
    }
    assert!(balancer.schedule(&tc.cluster).is_none());

    for id in 1004..1010 {
        add_led_region(&tc, id, 4);
    }
    let op = balancer.schedule(&tc.cluster).unwrap();
    assert!(matches!(op.steps()[0], OperatorStep::TransferLeader { from_store: 4, .. }));
}

#[test]
fn test_leader_balance_skips_down_target() {
    let (tc, _) = leader_cluster(&[(1, 2), (2, 6), (3, 8), (4, 12)]);
    let config = Arc::new(PlacementConfig::default());
    let balancer = LeaderBalancer::new(&tc.cluster, config);

    // Store 1 stops reporting past the down threshold
    tc.advance(Duration::from_secs(31 * 60), &[1]);
    let op = balancer.schedule(&tc.cluster).unwrap();
    assert_eq!(
        op.steps(),
        &[OperatorStep::TransferLeader {
            from_store: 4,
            to_store: 2
        }]
    );
}

fn zone_constraints() -> ReplicationConfig {
    let constraint = |zone: &str| LabelConstraint {
        labels: BTreeMap::from([("zone".to_string(), zone.to_string())]),
        replicas: 1,
    };
    ReplicationConfig {
        max_replicas: 3,
        location_labels: vec![],
        constraints: vec![constraint("z1"), constraint("z2"), constraint("z3")],
    }
}

/// Store 1 (z1) is the fullest; the only spare store is in z2
fn storage_cluster() -> TestCluster {
    fill_storage_cluster(TestCluster::new())
}

fn fill_storage_cluster(tc: TestCluster) -> TestCluster {
    tc.add_store(1, &[("zone", "z1")], 90);
    tc.add_store(2, &[("zone", "z2")], 40);
    tc.add_store(3, &[("zone", "z3")], 40);
    tc.add_store(4, &[("zone", "z2")], 10);
    for id in 1..=10 {
        tc.put_region(id, &[1, 2, 3]);
    }
    tc
}

#[test]
fn test_storage_balance_skips_source_without_target() {
    let tc = storage_cluster();
    let config = PlacementConfig {
        replication: zone_constraints(),
        ..Default::default()
    };
    let balancer = StorageBalancer::new(&tc.cluster, Arc::new(config));

    // Moving off store 1 would put a second replica in z2
    assert!(balancer.schedule(&tc.cluster).is_none());
    assert_eq!(balancer.skipped_stores(), vec![1]);

    // Store 1 is still the fullest but is skipped; store 2 may move to store 4
    let op = balancer.schedule(&tc.cluster).unwrap();
    assert!(op.steps().contains(&OperatorStep::RemovePeer { from_store: 2 }));
    assert!(!op.steps().contains(&OperatorStep::RemovePeer { from_store: 1 }));
    assert!(matches!(op.steps()[0], OperatorStep::AddPeer { to_store: 4, .. }));

    // Skip entries expire
    tc.advance(Duration::from_secs(31), &[]);
    assert!(balancer.skipped_stores().is_empty());
}

#[test]
fn test_storage_balance_moves_to_emptiest_store() {
    let tc = storage_cluster();
    let balancer = StorageBalancer::new(&tc.cluster, Arc::new(PlacementConfig::default()));

    let op = balancer.schedule(&tc.cluster).unwrap();
    assert_eq!(op.desc(), "balance-region");
    assert!(op.kind().contains(OperatorKind::REGION));
    assert!(matches!(op.steps()[0], OperatorStep::AddPeer { to_store: 4, .. }));
    assert_eq!(op.steps().last(), Some(&OperatorStep::RemovePeer { from_store: 1 }));
    assert!(balancer.skipped_stores().is_empty());
}

#[test]
fn test_storage_balance_needs_enough_regions() {
    let tc = TestCluster::new();
    tc.add_store(1, &[], 90);
    tc.add_store(2, &[], 40);
    tc.add_store(3, &[], 40);
    tc.add_store(4, &[], 10);
    tc.put_region(1, &[1, 2, 3]);

    let balancer = StorageBalancer::new(&tc.cluster, Arc::new(PlacementConfig::default()));
    assert!(balancer.schedule(&tc.cluster).is_none());
    assert!(balancer.skipped_stores().is_empty());
}

#[test]
fn test_storage_balance_retries_after_id_exhaustion() {
    let ids = Arc::new(MemoryIdAllocator::with_limit(10_000, 9_999));
    let tc = fill_storage_cluster(TestCluster::with_id_allocator(ids.clone()));
    let balancer = StorageBalancer::new(&tc.cluster, Arc::new(PlacementConfig::default()));

    assert!(balancer.schedule(&tc.cluster).is_none());
    // A failed allocation is not a missing target
    assert!(balancer.skipped_stores().is_empty());

    ids.raise_limit(u64::MAX);
    let op = balancer.schedule(&tc.cluster).unwrap();
    assert!(matches!(op.steps()[0], OperatorStep::AddPeer { to_store: 4, .. }));
    assert_eq!(op.steps().last(), Some(&OperatorStep::RemovePeer { from_store: 1 }));
}
