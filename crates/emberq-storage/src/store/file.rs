use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::{CheckpointSnapshot, CheckpointStore, LogStore};
use crate::StoredMessage;
use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Leave flushing to the OS page cache.
    None,
    /// fsync after every durable write.
    Immediate,
}

/// File-backed [`LogStore`]: one JSON-lines file per (topic, queue) under
/// `data_dir/<topic>/<queue_id>.log`. Global ordering is reconstructed from
/// the `message_offset` carried by every record.
pub struct FileLogStore {
    data_dir: PathBuf,
    sync_mode: SyncMode,
}

impl FileLogStore {
    pub fn new<P: AsRef<Path>>(data_dir: P, sync_mode: SyncMode) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        ensure_directory_exists(&data_dir)
            .map_err(|e| StorageError::write_failed(e, "log store data directory"))?;
        Ok(FileLogStore {
            data_dir,
            sync_mode,
        })
    }

    fn queue_log_path(&self, topic: &str, queue_id: u32) -> PathBuf {
        self.data_dir.join(topic).join(format!("{queue_id}.log"))
    }

    fn read_all_records(&self) -> Result<Vec<StoredMessage>, StorageError> {
        let mut records = Vec::new();

        let topic_entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) => return Err(StorageError::read_failed(e, "log store data directory")),
        };

        for topic_entry in topic_entries.flatten() {
            let topic_path = topic_entry.path();
            let name = topic_entry.file_name();
            let name = name.to_string_lossy();
            if !topic_path.is_dir() || name.starts_with('.') {
                continue;
            }

            let queue_entries = fs::read_dir(&topic_path)
                .map_err(|e| StorageError::read_failed(e, "topic directory"))?;
            for queue_entry in queue_entries.flatten() {
                let path = queue_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("log") {
                    continue;
                }
                self.read_queue_file(&path, &mut records)?;
            }
        }

        records.sort_by_key(|record| record.message_offset);
        Ok(records)
    }

    fn read_queue_file(
        &self,
        path: &Path,
        records: &mut Vec<StoredMessage>,
    ) -> Result<(), StorageError> {
        let contents =
            fs::read_to_string(path).map_err(|e| StorageError::read_failed(e, "queue log file"))?;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: StoredMessage = serde_json::from_str(line)
                .map_err(|e| StorageError::corruption(e, &path.display().to_string()))?;
            records.push(record);
        }
        Ok(())
    }
}

impl LogStore for FileLogStore {
    fn append_batch(&self, records: &[StoredMessage]) -> Result<(), StorageError> {
        let mut per_queue: HashMap<(&str, u32), Vec<&StoredMessage>> = HashMap::new();
        for record in records {
            per_queue
                .entry((record.topic.as_str(), record.queue_id))
                .or_default()
                .push(record);
        }

        for ((topic, queue_id), queue_records) in per_queue {
            let path = self.queue_log_path(topic, queue_id);
            if let Some(parent) = path.parent() {
                ensure_directory_exists(parent)
                    .map_err(|e| StorageError::write_failed(e, "topic directory"))?;
            }

            let mut file = open_file_for_append(&path)
                .map_err(|e| StorageError::write_failed(e, "queue log file"))?;
            let mut buffer = String::new();
            for record in queue_records {
                let line = serde_json::to_string(record)
                    .map_err(|e| StorageError::corruption(e, "queue log record"))?;
                buffer.push_str(&line);
                buffer.push('\n');
            }
            file.write_all(buffer.as_bytes())
                .map_err(|e| StorageError::write_failed(e, "queue log file"))?;
            sync_file_if_needed(&file, self.sync_mode)
                .map_err(|e| StorageError::write_failed(e, "queue log fsync"))?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self, callback), fields(data_dir = %self.data_dir.display()))]
    fn recover(&self, callback: &mut dyn FnMut(&StoredMessage)) -> Result<usize, StorageError> {
        let records = self.read_all_records()?;
        for record in &records {
            callback(record);
        }
        info!("Recovered {} records from {:?}", records.len(), self.data_dir);
        Ok(records.len())
    }

    fn batch_load(
        &self,
        start_offset: u64,
        count: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let end = start_offset.saturating_add(count as u64);
        let mut records = self.read_all_records()?;
        records.retain(|record| record.message_offset >= start_offset && record.message_offset < end);
        Ok(records)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn delete_below(
        &self,
        topic: &str,
        queue_id: u32,
        queue_offset: u64,
    ) -> Result<usize, StorageError> {
        let path = self.queue_log_path(topic, queue_id);
        if !path.exists() {
            return Ok(0);
        }

        let mut records = Vec::new();
        self.read_queue_file(&path, &mut records)?;
        let before = records.len();
        records.retain(|record| record.queue_offset >= queue_offset);
        let removed = before - records.len();
        if removed == 0 {
            return Ok(0);
        }

        // Rewrite through a temp file so a crash mid-delete cannot lose
        // retained records.
        let tmp_path = path.with_extension("log.tmp");
        {
            let mut tmp = File::create(&tmp_path)
                .map_err(|e| StorageError::write_failed(e, "queue log rewrite"))?;
            let mut buffer = String::new();
            for record in &records {
                let line = serde_json::to_string(record)
                    .map_err(|e| StorageError::corruption(e, "queue log record"))?;
                buffer.push_str(&line);
                buffer.push('\n');
            }
            tmp.write_all(buffer.as_bytes())
                .map_err(|e| StorageError::write_failed(e, "queue log rewrite"))?;
            sync_file_if_needed(&tmp, self.sync_mode)
                .map_err(|e| StorageError::write_failed(e, "queue log rewrite fsync"))?;
        }
        fs::rename(&tmp_path, &path)
            .map_err(|e| StorageError::write_failed(e, "queue log rename"))?;

        debug!("Deleted {removed} records, topic={topic}, queue_id={queue_id}, queue_offset<{queue_offset}");
        Ok(removed)
    }
}

/// File-backed [`CheckpointStore`]: one pretty-printed JSON snapshot at
/// `data_dir/checkpoints.json`, replaced atomically on every persist.
pub struct FileCheckpointStore {
    file_path: PathBuf,
    sync_mode: SyncMode,
}

impl FileCheckpointStore {
    pub fn new<P: AsRef<Path>>(data_dir: P, sync_mode: SyncMode) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        ensure_directory_exists(&data_dir)
            .map_err(|e| StorageError::write_failed(e, "checkpoint data directory"))?;
        Ok(FileCheckpointStore {
            file_path: data_dir.join("checkpoints.json"),
            sync_mode,
        })
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn persist(&self, snapshot: &CheckpointSnapshot) -> Result<(), StorageError> {
        let contents = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StorageError::corruption(e, "checkpoint snapshot"))?;

        let tmp_path = self.file_path.with_extension("json.tmp");
        {
            let mut tmp = File::create(&tmp_path)
                .map_err(|e| StorageError::write_failed(e, "checkpoint file"))?;
            tmp.write_all(contents.as_bytes())
                .map_err(|e| StorageError::write_failed(e, "checkpoint file"))?;
            sync_file_if_needed(&tmp, self.sync_mode)
                .map_err(|e| StorageError::write_failed(e, "checkpoint fsync"))?;
        }
        fs::rename(&tmp_path, &self.file_path)
            .map_err(|e| StorageError::write_failed(e, "checkpoint rename"))
    }

    fn load(&self) -> Result<CheckpointSnapshot, StorageError> {
        if !self.file_path.exists() {
            return Ok(CheckpointSnapshot::default());
        }
        let contents = fs::read_to_string(&self.file_path)
            .map_err(|e| StorageError::read_failed(e, "checkpoint file"))?;
        if contents.trim().is_empty() {
            return Ok(CheckpointSnapshot::default());
        }
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!(
                    "Failed to parse checkpoint file {}: {e}",
                    self.file_path.display()
                );
                Ok(CheckpointSnapshot::default())
            }
        }
    }
}

pub fn ensure_directory_exists<P: AsRef<Path>>(dir: P) -> Result<(), std::io::Error> {
    let dir = dir.as_ref();
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

pub fn open_file_for_append(file_path: &Path) -> Result<File, std::io::Error> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(file_path)
}

pub fn sync_file_if_needed(file: &File, sync_mode: SyncMode) -> Result<(), std::io::Error> {
    if sync_mode == SyncMode::Immediate {
        file.sync_all()
    } else {
        Ok(())
    }
}
