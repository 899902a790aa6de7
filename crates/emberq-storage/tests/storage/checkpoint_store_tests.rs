use emberq_storage::{CheckpointSnapshot, CheckpointStore, FileCheckpointStore, SyncMode, queue_key};
use test_log::test;

use super::test_utilities::*;

fn snapshot_with(group: &str, topic: &str, queue_id: u32, offset: u64) -> CheckpointSnapshot {
    let mut snapshot = CheckpointSnapshot::default();
    snapshot
        .groups
        .entry(group.to_string())
        .or_default()
        .insert(queue_key(topic, queue_id), offset);
    snapshot
}

#[test]
fn persist_and_load_round_trip() {
    let dir = create_test_dir("checkpoint_round_trip");
    let store = FileCheckpointStore::new(dir.path(), SyncMode::Immediate).unwrap();

    let mut snapshot = snapshot_with("g1", "orders", 0, 42);
    snapshot
        .groups
        .entry("g2".to_string())
        .or_default()
        .insert(queue_key("audit", 3), 7);
    store.persist(&snapshot).unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded, snapshot);
}

#[test]
fn load_without_a_file_returns_an_empty_snapshot() {
    let dir = create_test_dir("checkpoint_missing");
    let store = FileCheckpointStore::new(dir.path(), SyncMode::None).unwrap();
    assert_eq!(store.load().unwrap(), CheckpointSnapshot::default());
}

#[test]
fn corrupt_checkpoint_file_loads_as_empty() {
    let dir = create_test_dir("checkpoint_corrupt");
    let store = FileCheckpointStore::new(dir.path(), SyncMode::Immediate).unwrap();
    store.persist(&snapshot_with("g1", "orders", 0, 5)).unwrap();

    std::fs::write(dir.path().join("checkpoints.json"), "{ truncated").unwrap();
    assert_eq!(store.load().unwrap(), CheckpointSnapshot::default());
}

#[test]
fn persist_replaces_the_previous_snapshot() {
    let dir = create_test_dir("checkpoint_replace");
    let store = FileCheckpointStore::new(dir.path(), SyncMode::Immediate).unwrap();

    store.persist(&snapshot_with("g1", "orders", 0, 5)).unwrap();
    let replacement = snapshot_with("g2", "audit", 1, 9);
    store.persist(&replacement).unwrap();

    let loaded = store.load().unwrap();
    assert_eq!(loaded, replacement);
    assert!(!loaded.groups.contains_key("g1"));
}
