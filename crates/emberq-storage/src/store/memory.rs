use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{CheckpointSnapshot, CheckpointStore, LogStore};
use crate::StoredMessage;
use crate::error::StorageError;

/// In-process [`LogStore`]. Keyed by `message_offset` so recovery and batch
/// loads come back in global order for free.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    records: RwLock<BTreeMap<u64, StoredMessage>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl LogStore for MemoryLogStore {
    fn append_batch(&self, records: &[StoredMessage]) -> Result<(), StorageError> {
        let mut guard = self.records.write();
        for record in records {
            guard.insert(record.message_offset, record.clone());
        }
        Ok(())
    }

    fn recover(&self, callback: &mut dyn FnMut(&StoredMessage)) -> Result<usize, StorageError> {
        let guard = self.records.read();
        for record in guard.values() {
            callback(record);
        }
        Ok(guard.len())
    }

    fn batch_load(
        &self,
        start_offset: u64,
        count: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let end = start_offset.saturating_add(count as u64);
        Ok(self
            .records
            .read()
            .range(start_offset..end)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn delete_below(
        &self,
        topic: &str,
        queue_id: u32,
        queue_offset: u64,
    ) -> Result<usize, StorageError> {
        let mut guard = self.records.write();
        let before = guard.len();
        guard.retain(|_, record| {
            !(record.topic == topic
                && record.queue_id == queue_id
                && record.queue_offset < queue_offset)
        });
        Ok(before - guard.len())
    }
}

/// In-process [`CheckpointStore`]; holds the latest snapshot verbatim.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshot: RwLock<CheckpointSnapshot>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn persist(&self, snapshot: &CheckpointSnapshot) -> Result<(), StorageError> {
        *self.snapshot.write() = snapshot.clone();
        Ok(())
    }

    fn load(&self) -> Result<CheckpointSnapshot, StorageError> {
        Ok(self.snapshot.read().clone())
    }
}
