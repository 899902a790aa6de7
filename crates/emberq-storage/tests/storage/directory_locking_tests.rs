use emberq_storage::{StorageBackend, StorageError, SyncMode};
use test_log::test;

use super::test_utilities::create_test_dir;

#[test]
fn second_backend_is_rejected_while_the_lock_is_held() {
    let temp_dir = create_test_dir("locking");
    let data_dir = temp_dir.path().join("broker_data");

    let backend1 = StorageBackend::new_file_with_path(SyncMode::Immediate, &data_dir)
        .expect("First backend should acquire lock");

    match StorageBackend::new_file_with_path(SyncMode::Immediate, &data_dir) {
        Err(StorageError::DirectoryLocked { context, .. }) => {
            assert!(context.contains("already in use"));
        }
        other => panic!("Expected DirectoryLocked error, got {other:?}"),
    }

    assert!(data_dir.join(".emberq.lock").exists());

    drop(backend1);
    StorageBackend::new_file_with_path(SyncMode::Immediate, &data_dir)
        .expect("Lock should be reacquirable after the holder is dropped");
}

#[test]
fn stale_lock_from_a_dead_process_is_taken_over() {
    let temp_dir = create_test_dir("stale_lock");
    let data_dir = temp_dir.path().join("broker_data");

    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(
        data_dir.join(".emberq.lock"),
        "PID: 999999\nTimestamp: 2023-01-01T00:00:00Z\n",
    )
    .unwrap();

    StorageBackend::new_file_with_path(SyncMode::Immediate, &data_dir)
        .expect("Should recover from stale lock");
}

#[test]
fn file_backend_creates_both_stores() {
    let temp_dir = create_test_dir("backend_stores");
    let backend = StorageBackend::new_file_with_path(SyncMode::Immediate, temp_dir.path())
        .expect("Should create file backend");

    let _log_store = backend.create_log_store().unwrap();
    let _checkpoint_store = backend.create_checkpoint_store().unwrap();
}

#[test]
fn memory_backend_never_locks() {
    let backend1 = StorageBackend::new_memory();
    let backend2 = StorageBackend::new_memory();
    assert!(backend1.create_log_store().is_ok());
    assert!(backend2.create_checkpoint_store().is_ok());
}
