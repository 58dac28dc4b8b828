//! # Routing State Unit Tests
//!
//! Validates the ring interval arithmetic, the finger-table commit
//! discipline and the Chord maintenance primitives, including convergence
//! of a three-node ring driven to fixed point.

use ringhub_cluster::node::Node;
use ringhub_cluster::ring;

const BITS: u32 = 4;

#[test]
fn test_open_interval_is_empty_on_equal_bounds() {
    for k in 0..16u64 {
        for a in 0..16u64 {
            assert!(
                !ring::is_between(BITS, k, a, a),
                "({}, {}) must be empty but contained {}",
                a,
                a,
                k
            );
        }
    }
}

#[test]
fn test_closed_interval_on_equal_bounds_is_single_point() {
    for k in 0..16u64 {
        for a in 0..16u64 {
            assert_eq!(ring::is_in_range(BITS, k, a, a), k == a);
        }
    }
}

#[test]
fn test_interval_wraps_across_zero() {
    assert!(ring::is_between(BITS, 1, 14, 3));
    assert!(ring::is_between(BITS, 15, 14, 3));
    assert!(!ring::is_between(BITS, 14, 14, 3));
    assert!(!ring::is_between(BITS, 3, 14, 3));
    assert!(ring::is_in_range(BITS, 3, 14, 3));
    assert!(ring::is_in_range(BITS, 14, 14, 3));
}

#[test]
fn test_out_of_space_identifiers_are_rejected() {
    assert!(!ring::is_between(BITS, 16, 0, 8));
    assert!(!ring::is_in_range(BITS, 99, 0, 15));
    assert_eq!(ring::successor(BITS, 16, 0), None);
    assert_eq!(ring::successor(BITS, 3, BITS), None);
}

#[test]
fn test_successor_and_predecessor_are_inverse() {
    for k in 0..16u64 {
        for i in 0..BITS {
            let p = ring::predecessor(BITS, k, i).unwrap();
            assert_eq!(ring::successor(BITS, p, i), Some(k));
        }
    }
}

#[test]
fn test_standalone_node_owns_the_whole_ring() {
    let node = Node::with_bits(7, BITS).unwrap();
    assert_eq!(node.predecessor(), 7);
    assert_eq!(node.successor(), 7);
    assert!(node.is_stable());
    for k in 0..16u64 {
        assert_eq!(node.next_hop(k), 7, "next_hop({}) must stay local", k);
        assert!(node.is_local(k), "is_local({}) must hold standalone", k);
    }
    for i in 0..node.table_size() {
        let f = node.finger(i).unwrap();
        assert_eq!(f.current(), 7);
        assert_eq!(f.committed(), 7);
        assert!(!f.is_connected());
        assert_eq!(f.start(), ring::successor(BITS, 7, i as u32).unwrap());
    }
}

#[test]
fn test_join_seeds_the_bootstrap_successor() {
    let mut node = Node::with_bits(7, BITS).unwrap();
    assert!(node.join(11));
    assert_eq!(node.predecessor(), 0);
    assert_eq!(node.successor(), 11);
    assert!(!node.is_stable());
}

#[test]
fn test_stability_flag_follows_the_commit_discipline() {
    let mut node = Node::with_bits(7, BITS).unwrap();
    assert!(node.is_stable());

    // A value differing from the committed slot destabilizes the table.
    assert!(node.set(0, 11));
    assert_eq!(node.get(0), 11);
    assert_eq!(node.finger(0).unwrap().committed(), 7);
    assert!(!node.is_stable());
    assert!(!node.is_consistent(0));

    // Committing acknowledges the change without touching stability.
    node.commit(0);
    assert!(node.is_consistent(0));
    assert!(!node.is_stable());
}

#[test]
fn test_uncommitted_finger_refuses_further_updates() {
    let mut node = Node::with_bits(7, BITS).unwrap();
    assert!(node.set(0, 11));
    assert!(!node.set(0, 12), "uncommitted finger must reject a new value");
    node.commit(0);
    assert!(node.set(0, 12));
}

#[test]
fn test_update_flips_connected_state_and_clears_failed_predecessor() {
    let mut node = Node::with_bits(7, BITS).unwrap();
    node.set(0, 11);
    node.commit(0);
    assert!(node.update(11, true));
    assert!(node.is_connected(0));

    node.set_predecessor(11);
    assert!(node.update(11, false));
    assert_eq!(node.predecessor(), 0);
    assert!(!node.is_connected(0));
}

#[test]
fn test_notify_tightens_the_predecessor_interval() {
    let mut node = Node::with_bits(9, BITS).unwrap();
    node.set_predecessor(0);
    assert!(node.notify(1));
    assert_eq!(node.predecessor(), 1);
    // 5 sits between 1 and 9, so the claim tightens the interval.
    assert!(node.notify(5));
    assert_eq!(node.predecessor(), 5);
    // 1 no longer qualifies.
    assert!(!node.notify(1));
    assert_eq!(node.predecessor(), 5);
}

/// Drives stabilize + notify between three nodes until nothing changes,
/// then checks the converged neighbor sets.
#[test]
fn test_three_node_ring_converges() {
    let keys = [1u64, 5, 9];
    let mut nodes: Vec<Node> = keys
        .iter()
        .map(|k| Node::with_bits(*k, BITS).unwrap())
        .collect();

    // Nodes 5 and 9 bootstrap through node 1.
    nodes[1].join(1);
    nodes[2].join(1);

    for _ in 0..16 {
        for i in 0..nodes.len() {
            // stabilize: ask the successor for its predecessor.
            let successor = nodes[i].successor();
            let s_index = keys.iter().position(|k| *k == successor).unwrap();
            let claimed = nodes[s_index].predecessor();
            nodes[i].stabilize(claimed);
            if !nodes[i].is_consistent(0) {
                nodes[i].commit(0);
            }
            // notify: tell the (possibly new) successor about ourselves.
            let successor = nodes[i].successor();
            let s_index = keys.iter().position(|k| *k == successor).unwrap();
            let me = keys[i];
            nodes[s_index].notify(me);
        }
    }

    // Cyclic order 1 -> 5 -> 9 -> 1.
    assert_eq!((nodes[0].predecessor(), nodes[0].successor()), (9, 5));
    assert_eq!((nodes[1].predecessor(), nodes[1].successor()), (1, 9));
    assert_eq!((nodes[2].predecessor(), nodes[2].successor()), (5, 1));
}

#[test]
fn test_closest_preceding_skips_disconnected_fingers() {
    let mut node = Node::with_bits(1, BITS).unwrap();
    node.set(0, 5);
    node.commit(0);
    node.set(2, 9);
    node.commit(2);

    // Nothing is connected, so routing falls back to the node itself.
    assert_eq!(node.closest_preceding(0, true), 1);
    node.update(9, true);
    assert_eq!(node.closest_preceding(0, true), 9);
    node.update(5, true);
    assert_eq!(node.closest_preceding(6, true), 5);
}
