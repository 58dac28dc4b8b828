//! # Watcher Registry Tests
//!
//! Insert/lookup/remove semantics, the move-or-swap rename used by guest
//! promotion and single-shot iteration with in-place removal.

use ringhub_transport::{Connection, IterAction, Registry, Watcher, WatcherKind};

fn link(uid: u64) -> Watcher {
    let (connection, _stream) = Connection::pair().expect("socketpair");
    // The stream end is dropped; the watcher only needs a live descriptor.
    Watcher::new(uid, WatcherKind::Link(connection))
}

#[test]
fn test_put_rejects_duplicate_keys() {
    let mut registry = Registry::new();
    assert!(registry.put(link(5)).is_ok());
    assert!(registry.put(link(5)).is_err(), "duplicate key must be refused");
    assert_eq!(registry.len(), 1);

    let displaced = registry.replace(link(5));
    assert!(displaced.is_some(), "replace must hand back the old watcher");
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_move_renames_a_single_entry() {
    let mut registry = Registry::new();
    registry.put(link(1 << 63)).unwrap();

    assert!(registry.move_key(1 << 63, 42, false));
    assert!(!registry.contains(1 << 63));
    let moved = registry.get(42).expect("entry under the new key");
    assert_eq!(moved.uid(), 42, "stored identifier must follow the key");
}

#[test]
fn test_move_swaps_two_entries_when_allowed() {
    let mut registry = Registry::new();
    registry.put(link(10)).unwrap();
    registry.put(link(20)).unwrap();

    assert!(
        !registry.move_key(10, 20, false),
        "conflicting move without swap must fail"
    );
    assert!(registry.move_key(10, 20, true));
    assert_eq!(registry.get(10).unwrap().uid(), 10);
    assert_eq!(registry.get(20).unwrap().uid(), 20);
}

#[test]
fn test_move_fails_when_neither_key_exists() {
    let mut registry = Registry::new();
    assert!(!registry.move_key(1, 2, true));
}

#[test]
fn test_iterate_removes_in_place() {
    let mut registry = Registry::new();
    for uid in [1u64, 2, 3, 4] {
        registry.put(link(uid)).unwrap();
    }

    let removed = registry.iterate(|w| {
        if w.uid() % 2 == 0 {
            IterAction::Remove
        } else {
            IterAction::Continue
        }
    });
    assert_eq!(removed.len(), 2);
    assert_eq!(registry.len(), 2);
    assert!(registry.contains(1));
    assert!(registry.contains(3));
}

#[test]
fn test_iterate_halts_on_demand() {
    let mut registry = Registry::new();
    for uid in [1u64, 2, 3, 4] {
        registry.put(link(uid)).unwrap();
    }
    let mut seen = 0;
    registry.iterate(|_| {
        seen += 1;
        if seen == 2 {
            IterAction::Halt
        } else {
            IterAction::Continue
        }
    });
    assert_eq!(seen, 2, "iteration must stop where the callback halted");
}
