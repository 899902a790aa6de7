use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs4::fs_std::FileExt;
use log::warn;
use sysinfo::{ProcessesToUpdate, System};

use crate::error::StorageError;
use crate::store::file::{FileCheckpointStore, FileLogStore, SyncMode, ensure_directory_exists};
use crate::store::{CheckpointStore, LogStore, MemoryCheckpointStore, MemoryLogStore};

const LOCK_FILE_NAME: &str = ".emberq.lock";

/// Factory for the durable collaborators. The file variant holds an
/// exclusive lock on its data directory for as long as it is alive.
#[derive(Debug)]
pub enum StorageBackend {
    Memory,
    File {
        sync_mode: SyncMode,
        data_dir: PathBuf,
        _directory_lock: File,
    },
}

impl Drop for StorageBackend {
    fn drop(&mut self) {
        if let StorageBackend::File { data_dir, .. } = self {
            let lock_path = data_dir.join(LOCK_FILE_NAME);
            if lock_path.exists() {
                if let Err(e) = std::fs::remove_file(&lock_path) {
                    warn!("Failed to remove lock file {lock_path:?}: {e}");
                }
            }
        }
    }
}

impl StorageBackend {
    pub fn new_memory() -> Self {
        StorageBackend::Memory
    }

    pub fn new_file(sync_mode: SyncMode) -> Result<Self, StorageError> {
        Self::new_file_with_path(sync_mode, "./data")
    }

    pub fn new_file_with_path<P: AsRef<Path>>(
        sync_mode: SyncMode,
        data_dir: P,
    ) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let directory_lock = acquire_directory_lock(&data_dir)?;
        Ok(StorageBackend::File {
            sync_mode,
            data_dir,
            _directory_lock: directory_lock,
        })
    }

    pub fn create_log_store(&self) -> Result<Arc<dyn LogStore>, StorageError> {
        match self {
            StorageBackend::Memory => Ok(Arc::new(MemoryLogStore::new())),
            StorageBackend::File {
                sync_mode,
                data_dir,
                ..
            } => Ok(Arc::new(FileLogStore::new(data_dir, *sync_mode)?)),
        }
    }

    pub fn create_checkpoint_store(&self) -> Result<Arc<dyn CheckpointStore>, StorageError> {
        match self {
            StorageBackend::Memory => Ok(Arc::new(MemoryCheckpointStore::new())),
            StorageBackend::File {
                sync_mode,
                data_dir,
                ..
            } => Ok(Arc::new(FileCheckpointStore::new(data_dir, *sync_mode)?)),
        }
    }
}

fn acquire_directory_lock<P: AsRef<Path>>(data_dir: P) -> Result<File, StorageError> {
    let data_dir = data_dir.as_ref();

    ensure_directory_exists(data_dir)
        .map_err(|e| StorageError::write_failed(e, "data directory"))?;
    let lock_path = data_dir.join(LOCK_FILE_NAME);
    let lock_file = create_lock_file(&lock_path)?;

    match attempt_to_acquire_lock(&lock_file) {
        Ok(()) => {
            write_lock_metadata(&lock_file)?;
            Ok(lock_file)
        }
        Err(StorageError::LockAcquisitionFailed) => handle_lock_conflict(&lock_path, data_dir),
        Err(e) => Err(e),
    }
}

fn create_lock_file(lock_path: &Path) -> Result<File, StorageError> {
    if lock_path.exists() {
        OpenOptions::new()
            .write(true)
            .open(lock_path)
            .map_err(|e| StorageError::write_failed(e, "existing lock file"))
    } else {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(lock_path)
            .map_err(|e| StorageError::write_failed(e, "lock file"))
    }
}

fn attempt_to_acquire_lock(lock_file: &File) -> Result<(), StorageError> {
    match lock_file.try_lock_exclusive() {
        Ok(true) => Ok(()),
        Ok(false) | Err(_) => Err(StorageError::LockAcquisitionFailed),
    }
}

fn write_lock_metadata(lock_file: &File) -> Result<(), StorageError> {
    let pid = std::process::id();
    let timestamp = chrono::Utc::now().to_rfc3339();
    let lock_info = format!("PID: {pid}\nTimestamp: {timestamp}\n");

    let _ = lock_file.set_len(0);
    (&*lock_file)
        .write_all(lock_info.as_bytes())
        .map_err(|e| StorageError::write_failed(e, "lock metadata"))
}

fn handle_lock_conflict<P: AsRef<Path>>(
    lock_path: &Path,
    data_dir: P,
) -> Result<File, StorageError> {
    let existing_pid = extract_pid_from_lock_file(lock_path);

    match existing_pid {
        Some(pid) if is_process_alive(pid) => Err(StorageError::DirectoryLocked {
            context: "Data directory is already in use by another broker instance".to_string(),
            pid: Some(pid),
        }),
        Some(_) | None => {
            // Stale lock from a dead process; take it over.
            if std::fs::remove_file(lock_path).is_ok() {
                acquire_directory_lock(data_dir)
            } else {
                Err(StorageError::DirectoryLocked {
                    context: "Data directory is already in use by another broker instance"
                        .to_string(),
                    pid: None,
                })
            }
        }
    }
}

fn extract_pid_from_lock_file(lock_path: &Path) -> Option<u32> {
    std::fs::read_to_string(lock_path).ok().and_then(|content| {
        content
            .lines()
            .find(|line| line.starts_with("PID:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|pid_str| pid_str.parse::<u32>().ok())
    })
}

fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, false);
    system
        .processes()
        .get(&sysinfo::Pid::from(pid as usize))
        .is_some()
}
