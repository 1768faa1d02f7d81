/// Integration tests for gossip-to-cluster synchronization.
///
/// These tests verify the synchronizer's externally visible behavior:
/// - Nodes only become members once both immutable fields arrive
/// - Duplicate, stale and self-referencing events are ignored
/// - Status observed while pending survives promotion
/// - Local endpoint changes are mirrored into gossip
use cluster_sync::prelude::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

const LOCAL_ID: &str = "local";

/// Helper function to create a synchronizer over a fresh cluster state.
fn create_test_syncer() -> Arc<Syncer<ClusterState>> {
    let config = NodeConfig::new()
        .node_id(LOCAL_ID)
        .proxy_addr("10.0.0.1:8000")
        .admin_addr("10.0.0.1:8002");
    let state = Arc::new(ClusterState::new(&config).unwrap());
    Arc::new(Syncer::new(state))
}

fn id(s: &str) -> NodeId {
    NodeId::new(s)
}

fn promote(syncer: &Syncer<ClusterState>, node_id: &NodeId) {
    syncer.on_join(node_id);
    syncer.on_upsert_key(node_id, "proxy_addr", "10.0.0.2:8000");
    syncer.on_upsert_key(node_id, "admin_addr", "10.0.0.2:8002");
}

/// Gossiper recording every call in order.
#[derive(Default)]
struct RecordingGossiper {
    ops: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingGossiper {
    fn ops(&self) -> Vec<(String, Option<String>)> {
        self.ops.lock().clone()
    }
}

impl Gossiper for RecordingGossiper {
    fn upsert_local(&self, key: &str, value: &str) {
        self.ops.lock().push((key.to_string(), Some(value.to_string())));
    }

    fn delete_local(&self, key: &str) {
        self.ops.lock().push((key.to_string(), None));
    }
}

#[test]
fn test_upserts_without_join_are_dropped() {
    let syncer = create_test_syncer();
    let a = id("a");

    syncer.on_upsert_key(&a, "proxy_addr", "10.0.0.2:8000");
    syncer.on_upsert_key(&a, "admin_addr", "10.0.0.2:8002");

    assert_eq!(syncer.locate(&a), NodeLocation::Unknown);
    assert!(syncer.store().node(&a).is_none());
}

#[test]
fn test_join_is_idempotent() {
    let syncer = create_test_syncer();
    let a = id("a");

    syncer.on_join(&a);
    syncer.on_join(&a);
    assert_eq!(syncer.pending_count(), 1);

    syncer.on_upsert_key(&a, "proxy_addr", "10.0.0.2:8000");
    syncer.on_upsert_key(&a, "admin_addr", "10.0.0.2:8002");
    syncer.on_upsert_key(&a, "endpoint:e1", "3");
    let before = syncer.store().node(&a).unwrap();

    // Join after promotion is rejected.
    syncer.on_join(&a);
    assert_eq!(syncer.pending_count(), 0);
    assert_eq!(syncer.store().node(&a).unwrap(), before);
}

#[test]
fn test_status_carried_over_promotion() {
    let syncer = create_test_syncer();
    let a = id("a");

    syncer.on_join(&a);
    syncer.on_unreachable(&a);
    syncer.on_upsert_key(&a, "admin_addr", "10.0.0.2:8002");
    syncer.on_upsert_key(&a, "proxy_addr", "10.0.0.2:8000");

    assert_eq!(
        syncer.store().node(&a).unwrap().status,
        NodeStatus::Unreachable
    );
}

#[test]
fn test_unreachable_member_is_kept() {
    let syncer = create_test_syncer();
    let a = id("a");
    promote(&syncer, &a);

    syncer.on_unreachable(&a);
    assert_eq!(syncer.store().node(&a).unwrap().status, NodeStatus::Unreachable);

    syncer.on_reachable(&a);
    assert_eq!(syncer.store().node(&a).unwrap().status, NodeStatus::Active);
}

#[test]
fn test_self_events_rejected() {
    let syncer = create_test_syncer();
    let local = id(LOCAL_ID);
    let local_before = syncer.store().local_node();

    syncer.on_join(&local);
    syncer.on_upsert_key(&local, "proxy_addr", "10.9.9.9:8000");
    syncer.on_upsert_key(&local, "admin_addr", "10.9.9.9:8002");
    syncer.on_upsert_key(&local, "endpoint:e1", "4");
    syncer.on_delete_key(&local, "endpoint:e1");
    syncer.on_unreachable(&local);
    syncer.on_reachable(&local);
    syncer.on_leave(&local);
    syncer.on_expired(&local);

    assert_eq!(syncer.pending_count(), 0);
    assert!(syncer.store().nodes().is_empty());
    assert_eq!(syncer.store().local_node(), local_before);
}

#[test]
fn test_immutable_redelivery_after_promotion_ignored() {
    let syncer = create_test_syncer();
    let a = id("a");
    promote(&syncer, &a);

    syncer.on_upsert_key(&a, "proxy_addr", "10.0.0.2:8000");
    syncer.on_upsert_key(&a, "proxy_addr", "10.7.7.7:8000");
    syncer.on_upsert_key(&a, "admin_addr", "10.7.7.7:8002");

    let node = syncer.store().node(&a).unwrap();
    assert_eq!(node.proxy_addr, "10.0.0.2:8000");
    assert_eq!(node.admin_addr, "10.0.0.2:8002");
    assert_eq!(syncer.pending_count(), 0);
}

#[test]
fn test_leave_before_promotion_discards() {
    let syncer = create_test_syncer();
    let a = id("a");

    syncer.on_join(&a);
    syncer.on_upsert_key(&a, "proxy_addr", "10.0.0.2:8000");
    syncer.on_leave(&a);
    assert_eq!(syncer.locate(&a), NodeLocation::Unknown);

    // Late upserts still in flight can't promote the node.
    syncer.on_upsert_key(&a, "admin_addr", "10.0.0.2:8002");
    syncer.on_upsert_key(&a, "endpoint:e1", "1");
    assert_eq!(syncer.locate(&a), NodeLocation::Unknown);
    assert!(syncer.store().nodes().is_empty());
}

#[test]
fn test_expiry_removes_from_either_location() {
    let syncer = create_test_syncer();
    let pending = id("pending");
    let member = id("member");

    syncer.on_join(&pending);
    promote(&syncer, &member);

    syncer.on_expired(&pending);
    syncer.on_expired(&member);
    assert_eq!(syncer.locate(&pending), NodeLocation::Unknown);
    assert_eq!(syncer.locate(&member), NodeLocation::Unknown);

    // Unknown node is a no-op.
    syncer.on_expired(&id("ghost"));
    assert!(syncer.store().nodes().is_empty());
}

#[test]
fn test_left_member_rejoin_rejected_until_expiry() {
    let syncer = create_test_syncer();
    let a = id("a");
    promote(&syncer, &a);
    syncer.on_leave(&a);

    syncer.on_join(&a);
    assert_eq!(syncer.locate(&a), NodeLocation::Active);
    assert_eq!(syncer.store().node(&a).unwrap().status, NodeStatus::Left);

    syncer.on_expired(&a);
    syncer.on_join(&a);
    assert_eq!(syncer.locate(&a), NodeLocation::Pending);
}

#[test]
fn test_sync_publishes_immutable_fields_first() {
    let syncer = create_test_syncer();
    syncer.store().add_local_endpoint("e1");

    let gossiper = Arc::new(RecordingGossiper::default());
    syncer.sync(gossiper.clone());

    let ops = gossiper.ops();
    assert_eq!(
        ops,
        vec![
            ("proxy_addr".to_string(), Some("10.0.0.1:8000".to_string())),
            ("admin_addr".to_string(), Some("10.0.0.1:8002".to_string())),
            ("endpoint:e1".to_string(), Some("1".to_string())),
        ]
    );
}

#[test]
fn test_zero_listeners_deletes_key() {
    let syncer = create_test_syncer();
    let gossiper = Arc::new(RecordingGossiper::default());
    syncer.sync(gossiper.clone());

    syncer.store().add_local_endpoint("e1");
    syncer.store().remove_local_endpoint("e1");

    let ops = gossiper.ops();
    assert_eq!(ops[ops.len() - 2], ("endpoint:e1".to_string(), Some("1".to_string())));
    assert_eq!(ops[ops.len() - 1], ("endpoint:e1".to_string(), None));
    assert!(!ops.iter().any(|(_, value)| value.as_deref() == Some("0")));
}

#[test]
fn test_remote_sync_round_trip() {
    // Node B publishes its state, node A consumes it as gossip events.
    let a = create_test_syncer();
    let b_config = NodeConfig::new()
        .node_id("b")
        .proxy_addr("10.0.0.3:8000")
        .admin_addr("10.0.0.3:8002");
    let b_state = Arc::new(ClusterState::new(&b_config).unwrap());
    let b = Syncer::new(Arc::clone(&b_state));
    b_state.add_local_endpoint("e1");

    let gossiper = Arc::new(RecordingGossiper::default());
    b.sync(gossiper.clone());
    b_state.add_local_endpoint("e2");

    let b_id = id("b");
    a.on_join(&b_id);
    for (key, value) in gossiper.ops() {
        match value {
            Some(value) => a.on_upsert_key(&b_id, &key, &value),
            None => a.on_delete_key(&b_id, &key),
        }
    }

    let node = a.store().node(&b_id).unwrap();
    assert_eq!(node.proxy_addr, "10.0.0.3:8000");
    assert_eq!(node.listeners("e1"), 1);
    assert_eq!(node.listeners("e2"), 1);
}

#[test]
fn test_concurrent_delivery_across_nodes() {
    let syncer = create_test_syncer();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let syncer = Arc::clone(&syncer);
            thread::spawn(move || {
                let node_id = NodeId::new(format!("node-{}", i));
                syncer.on_upsert_key(&node_id, "endpoint:e1", "1");
                syncer.on_join(&node_id);
                syncer.on_upsert_key(&node_id, "endpoint:e1", "2");
                syncer.on_upsert_key(&node_id, "proxy_addr", "p");
                syncer.on_upsert_key(&node_id, "admin_addr", "q");
                syncer.on_upsert_key(&node_id, "endpoint:e1", "3");
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let nodes = syncer.store().nodes();
    assert_eq!(nodes.len(), 8);
    assert!(nodes.iter().all(|n| n.listeners("e1") == 3));
    assert_eq!(syncer.pending_count(), 0);
}

#[test]
fn test_concurrent_deltas_racing_promotion() {
    for _ in 0..50 {
        let syncer = create_test_syncer();
        let a = id("a");
        syncer.on_join(&a);

        let promoter = {
            let syncer = Arc::clone(&syncer);
            let a = a.clone();
            thread::spawn(move || {
                syncer.on_upsert_key(&a, "proxy_addr", "p");
                syncer.on_upsert_key(&a, "admin_addr", "q");
            })
        };
        let updater = {
            let syncer = Arc::clone(&syncer);
            let a = a.clone();
            thread::spawn(move || {
                syncer.on_unreachable(&a);
                syncer.on_upsert_key(&a, "endpoint:e1", "7");
            })
        };
        promoter.join().unwrap();
        updater.join().unwrap();

        // Whichever order the threads ran in, nothing was lost.
        let node = syncer.store().node(&a).unwrap();
        assert_eq!(node.status, NodeStatus::Unreachable);
        assert_eq!(node.listeners("e1"), 7);
    }
}

#[test]
fn test_concurrent_local_endpoint_changes_converge() {
    let syncer = create_test_syncer();
    let gossip = Arc::new(LocalGossipState::new());
    syncer.sync(gossip.clone());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let state = Arc::clone(syncer.store());
            thread::spawn(move || {
                for _ in 0..200 {
                    state.add_local_endpoint("e1");
                    state.remove_local_endpoint("e1");
                }
                // Half the threads leave a listener behind.
                if i % 2 == 0 {
                    state.add_local_endpoint("e1");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(syncer.store().local_endpoint_listener_count("e1"), 4);
    assert_eq!(gossip.get("endpoint:e1").as_deref(), Some("4"));
}

#[derive(Debug, Clone)]
enum Delta {
    Proxy,
    Admin,
    Endpoint(u8, u8),
}

fn delta_strategy() -> impl Strategy<Value = Delta> {
    prop_oneof![
        Just(Delta::Proxy),
        Just(Delta::Admin),
        (0u8..4, 1u8..10).prop_map(|(e, n)| Delta::Endpoint(e, n)),
    ]
}

proptest! {
    #[test]
    fn prop_promotion_requires_both_addresses(
        mut deltas in prop::collection::vec(delta_strategy(), 0..12),
        include_proxy in any::<bool>(),
        include_admin in any::<bool>(),
        shuffle_seed in any::<u64>(),
    ) {
        deltas.retain(|d| !matches!(d, Delta::Proxy | Delta::Admin));
        if include_proxy {
            deltas.push(Delta::Proxy);
        }
        if include_admin {
            deltas.push(Delta::Admin);
        }
        // Deterministic shuffle so the addresses land anywhere in the stream.
        let len = deltas.len();
        for i in (1..len).rev() {
            let j = (shuffle_seed.wrapping_mul(i as u64 + 7) % (i as u64 + 1)) as usize;
            deltas.swap(i, j);
        }

        let syncer = create_test_syncer();
        let a = id("a");
        syncer.on_join(&a);

        let mut seen_proxy = false;
        let mut seen_admin = false;
        for delta in &deltas {
            match delta {
                Delta::Proxy => {
                    seen_proxy = true;
                    syncer.on_upsert_key(&a, "proxy_addr", "p");
                }
                Delta::Admin => {
                    seen_admin = true;
                    syncer.on_upsert_key(&a, "admin_addr", "q");
                }
                Delta::Endpoint(e, n) => {
                    syncer.on_upsert_key(&a, &format!("endpoint:e{}", e), &n.to_string());
                }
            }
            let visible = syncer.store().node(&a).is_some();
            prop_assert_eq!(visible, seen_proxy && seen_admin);
            prop_assert_eq!(syncer.is_pending(&a), !(seen_proxy && seen_admin));
        }

        // Last write per endpoint wins regardless of where promotion happened.
        if include_proxy && include_admin {
            let node = syncer.store().node(&a).unwrap();
            for e in 0u8..4 {
                let expected = deltas.iter().rev().find_map(|d| match d {
                    Delta::Endpoint(de, n) if *de == e => Some(*n as usize),
                    _ => None,
                });
                prop_assert_eq!(node.listeners(&format!("e{}", e)), expected.unwrap_or(0));
            }
        }
    }
}
