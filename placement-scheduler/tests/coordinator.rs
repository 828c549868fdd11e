//! Heartbeat dispatch and scheduler loop behaviour
//!
//! Run with: cargo test -p placement-scheduler --test coordinator

mod common;

use common::{region_with_keys, TestCluster};
use placement_core::PlacementError;
use placement_metadata::RegionEpoch;
use placement_scheduler::operator::{create_remove_peer_operator, create_transfer_leader_operator};
use placement_scheduler::{Handler, LeaderBalancer, OperatorKind, PlacementConfig};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_stale_heartbeat_rejected_without_mutation() {
    let tc = TestCluster::new();
    for id in 1..=3 {
        tc.add_store(id, &[], 20);
    }
    let co = tc.coordinator(PlacementConfig::default());

    let current = tc.region(1, &[1, 2, 3]).with_epoch(RegionEpoch::new(3, 2));
    co.handle_region_heartbeat(current.clone()).unwrap();

    for epoch in [RegionEpoch::new(2, 2), RegionEpoch::new(3, 1)] {
        let stale = tc.region(1, &[1, 2]).with_epoch(epoch);
        let err = co.handle_region_heartbeat(stale).unwrap_err();
        assert!(err.is_stale(), "{err}");
    }
    let cached = tc.cluster.get_region(1).unwrap();
    assert_eq!(cached.epoch(), RegionEpoch::new(3, 2));
    assert_eq!(cached.peers().len(), 3);
    assert!(co.get_operators().is_empty());
}

#[test]
fn test_empty_or_inverted_key_range_rejected() {
    let tc = TestCluster::new();
    for id in 1..=3 {
        tc.add_store(id, &[], 20);
    }
    let co = tc.coordinator(PlacementConfig::default());
    co.handle_region_heartbeat(region_with_keys(1, b"", b"", &[1, 2, 3]))
        .unwrap();

    for (start, end) in [(&b"x"[..], &b"x"[..]), (&b"x"[..], &b"a"[..])] {
        let err = co
            .handle_region_heartbeat(region_with_keys(2, start, end, &[1, 2, 3]))
            .unwrap_err();
        assert!(matches!(err, PlacementError::InvalidRegion { region_id: 2, .. }));
    }
    assert!(tc.cluster.get_region(2).is_none());
    assert!(tc.cluster.get_region(1).unwrap().end_key().is_empty());
    assert!(co.get_operators().is_empty());
}

#[test]
fn test_at_most_one_operator_per_region() {
    let tc = TestCluster::new();
    for id in 1..=4 {
        tc.add_store(id, &[], 20);
    }
    let co = tc.coordinator(PlacementConfig::default());
    let region = tc.put_region(1, &[1, 2, 3]);
    let now = tc.cluster.now();

    let attempts = [
        create_transfer_leader_operator("a", &region, 1, 2, OperatorKind::BALANCE, now),
        create_transfer_leader_operator("b", &region, 1, 3, OperatorKind::BALANCE, now),
        create_remove_peer_operator("c", &region, 3, OperatorKind::REPLICA, now),
        create_remove_peer_operator("d", &region, 2, OperatorKind::REPLICA, now),
        create_remove_peer_operator("e", &region, 2, OperatorKind::ADMIN, now),
        create_transfer_leader_operator("f", &region, 1, 3, OperatorKind::BALANCE, now),
    ];
    let admitted: Vec<bool> = attempts
        .into_iter()
        .map(|op| {
            let ok = co.add_operator(op).is_ok();
            assert_eq!(co.get_operators().len(), 1);
            ok
        })
        .collect();

    assert_eq!(admitted, vec![true, false, true, false, true, false]);
    assert_eq!(co.get_operator(1).unwrap().desc(), "e");
}

#[test]
fn test_operator_dropped_when_region_swallowed() {
    let tc = TestCluster::new();
    for id in 1..=3 {
        tc.add_store(id, &[], 20);
    }
    let co = tc.coordinator(PlacementConfig::default());
    let handler = Handler::new(co.clone());
    let left = tc.region(1, &[1, 2, 3]);
    let right = tc.region(2, &[1, 2, 3]);
    co.handle_region_heartbeat(left.clone()).unwrap();
    co.handle_region_heartbeat(right.clone()).unwrap();

    handler.transfer_leader(1, 2).unwrap();
    assert!(handler.operator(1).unwrap().is_some());

    // Region 2 grows over region 1
    let mut grown = right.clone();
    grown.meta.start_key = left.start_key().to_vec();
    grown.meta.epoch.version += 1;
    co.handle_region_heartbeat(grown).unwrap();

    assert!(co.get_operator(1).is_none());
    assert!(matches!(
        handler.operator(1),
        Err(PlacementError::RegionNotFound(1))
    ));
}

#[test]
fn test_timed_out_operators_collected() {
    let tc = TestCluster::new();
    for id in 1..=3 {
        tc.add_store(id, &[], 20);
    }
    let co = tc.coordinator(PlacementConfig::default());
    let region = tc.put_region(1, &[1, 2, 3]);
    let now = tc.cluster.now();
    co.add_operator(create_transfer_leader_operator("t", &region, 1, 2, OperatorKind::ADMIN, now))
        .unwrap();

    tc.advance(Duration::from_secs(5), &[]);
    assert_eq!(co.collect_timed_out_operators(), 0);
    tc.advance(Duration::from_secs(6), &[]);
    assert_eq!(co.collect_timed_out_operators(), 1);
    assert!(co.get_operators().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_leader_balancer_loop_respects_limit() {
    let tc = TestCluster::new();
    for id in 1..=4 {
        tc.add_store(id, &[], 50);
    }
    // Store 4 leads 40 regions, the others none
    for id in 1..=40 {
        tc.put_region(id, &[4, 1, 2, 3]);
    }

    let mut config = PlacementConfig::default();
    config.schedule.leader_schedule_limit = 2;
    let config = Arc::new(config);
    let co = tc.coordinator((*config).clone());
    co.start();
    co.add_scheduler(Arc::new(LeaderBalancer::new(&tc.cluster, config)))
        .unwrap();
    assert_eq!(co.scheduler_names(), vec!["balance-leader-scheduler".to_string()]);

    tokio::time::sleep(Duration::from_secs(2)).await;

    // Nothing reports back, so the operators stay in flight up to the limit
    assert_eq!(co.operator_count(OperatorKind::LEADER), 2);
    for op in co.get_operators() {
        assert!(op.kind().contains(OperatorKind::BALANCE));
        assert_eq!(op.steps().len(), 1);
    }

    co.stop().await;
    assert!(co.scheduler_names().is_empty());
}
