use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use emberq_storage::{CheckpointSnapshot, CheckpointStore, StorageError, parse_queue_key, queue_key};
use log::{info, warn};
use parking_lot::Mutex;

use crate::task::PeriodicTask;

/// Last-acknowledged queue offset per (topic, queue, consumer group),
/// persisted through a [`CheckpointStore`] and restored before the broker
/// serves traffic.
pub struct CheckpointManager {
    offsets: DashMap<String, DashMap<(String, u32), u64>>,
    store: Arc<dyn CheckpointStore>,
    persist_interval: Duration,
    persist_task: Mutex<Option<PeriodicTask>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, persist_interval: Duration) -> Self {
        CheckpointManager {
            offsets: DashMap::new(),
            store,
            persist_interval,
            persist_task: Mutex::new(None),
        }
    }

    /// Max-merge: an acknowledgment arriving out of order never moves a
    /// checkpoint backwards.
    pub fn update_checkpoint(&self, topic: &str, queue_id: u32, group: &str, offset: u64) {
        let group_offsets = self.offsets.entry(group.to_string()).or_default();
        group_offsets
            .entry((topic.to_string(), queue_id))
            .and_modify(|current| {
                if offset > *current {
                    *current = offset;
                }
            })
            .or_insert(offset);
    }

    pub fn checkpoint(&self, topic: &str, queue_id: u32, group: &str) -> Option<u64> {
        self.offsets
            .get(group)
            .and_then(|group_offsets| group_offsets.get(&(topic.to_string(), queue_id)).map(|v| *v))
    }

    /// Minimum checkpoint across every group that has acknowledged this
    /// queue. `None` means no safe point exists and retention must delete
    /// nothing.
    pub fn min_checkpoint(&self, topic: &str, queue_id: u32) -> Option<u64> {
        let key = (topic.to_string(), queue_id);
        self.offsets
            .iter()
            .filter_map(|group_offsets| group_offsets.value().get(&key).map(|v| *v))
            .min()
    }

    pub fn snapshot(&self) -> CheckpointSnapshot {
        let mut snapshot = CheckpointSnapshot::default();
        for group_entry in self.offsets.iter() {
            let group_map = snapshot
                .groups
                .entry(group_entry.key().clone())
                .or_default();
            for offset_entry in group_entry.value().iter() {
                let (topic, queue_id) = offset_entry.key();
                group_map.insert(queue_key(topic, *queue_id), *offset_entry.value());
            }
        }
        snapshot
    }

    /// Restore durable checkpoints; malformed keys are logged and skipped.
    pub fn recover(&self) -> Result<(), StorageError> {
        self.offsets.clear();
        let snapshot = self.store.load()?;

        let mut restored = 0usize;
        for (group, entries) in snapshot.groups {
            for (key, offset) in entries {
                match parse_queue_key(&key) {
                    Some((topic, queue_id)) => {
                        self.update_checkpoint(&topic, queue_id, &group, offset);
                        restored += 1;
                    }
                    None => warn!("Skipping malformed checkpoint key '{key}' for group {group}"),
                }
            }
        }
        info!("{restored} checkpoints recovered");
        Ok(())
    }

    pub fn persist_now(&self) {
        if let Err(e) = self.store.persist(&self.snapshot()) {
            warn!("Failed to persist checkpoints, will retry next cycle: {e}");
        }
    }

    pub fn start(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        *self.persist_task.lock() = Some(PeriodicTask::spawn(
            "checkpoint-persist",
            self.persist_interval,
            move || {
                if let Some(manager) = manager.upgrade() {
                    manager.persist_now();
                }
            },
        ));
    }

    pub fn shutdown(&self) {
        self.persist_task.lock().take();
        self.persist_now();
    }
}
