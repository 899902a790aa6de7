use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Timelike;
use dashmap::DashMap;
use emberq_storage::{LogStore, Message, StorageError, StoredMessage};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::BrokerSettings;
use crate::task::PeriodicTask;

/// The broker's durable, append-only message log.
///
/// Writes land in a resident window and are flushed to the [`LogStore`] in
/// bounded batches by a background sweep; a record leaves the window only
/// once its batch is confirmed durable, so a failed flush loses nothing and
/// simply retries next cycle. Global offsets come from a single atomic
/// counter and are therefore unique and strictly increasing across all
/// topics and queues.
pub struct MessageLog {
    resident: DashMap<u64, StoredMessage>,
    current_offset: AtomicI64,
    persisted_offset: AtomicI64,
    safe_delete_offsets: DashMap<(String, u32), u64>,
    store: Arc<dyn LogStore>,
    flush_lock: Mutex<()>,
    persist_batch_max: usize,
    batch_load_size: usize,
    delete_hour_of_day: Option<u32>,
    flush_task: Mutex<Option<PeriodicTask>>,
    delete_task: Mutex<Option<PeriodicTask>>,
}

impl MessageLog {
    pub fn new(store: Arc<dyn LogStore>, settings: &BrokerSettings) -> Self {
        MessageLog {
            resident: DashMap::new(),
            current_offset: AtomicI64::new(-1),
            persisted_offset: AtomicI64::new(-1),
            safe_delete_offsets: DashMap::new(),
            store,
            flush_lock: Mutex::new(()),
            persist_batch_max: settings.persist_batch_max,
            batch_load_size: settings.batch_load_size,
            delete_hour_of_day: settings.delete_message_hour_of_day,
            flush_task: Mutex::new(None),
            delete_task: Mutex::new(None),
        }
    }

    /// Assign the next global offset and admit the message to the resident
    /// window. Safe under concurrent producers.
    pub fn append(&self, queue_id: u32, queue_offset: u64, message: Message) -> StoredMessage {
        let message_offset = (self.current_offset.fetch_add(1, Ordering::SeqCst) + 1) as u64;
        let stored = StoredMessage::from_message(message, message_offset, queue_id, queue_offset);
        self.resident.insert(message_offset, stored.clone());
        stored
    }

    /// Serve from the resident window; on a miss, load a contiguous batch
    /// from the durable store and retry once.
    pub fn get(&self, message_offset: u64) -> Option<StoredMessage> {
        if let Some(record) = self.resident.get(&message_offset) {
            return Some(record.clone());
        }

        match self.store.batch_load(message_offset, self.batch_load_size) {
            Ok(records) => {
                for record in records {
                    self.resident.insert(record.message_offset, record);
                }
            }
            Err(e) => warn!("Batch load from offset {message_offset} failed: {e}"),
        }

        self.resident
            .get(&message_offset)
            .map(|record| record.clone())
    }

    /// Replay the durable store in ascending global order, invoking the
    /// callback per record, and resume the offset counter after the highest
    /// recovered offset. Replaying twice from an empty state is idempotent.
    pub fn recover(
        &self,
        mut callback: impl FnMut(&StoredMessage),
    ) -> Result<usize, StorageError> {
        self.resident.clear();
        self.safe_delete_offsets.clear();
        self.current_offset.store(-1, Ordering::SeqCst);
        self.persisted_offset.store(-1, Ordering::SeqCst);

        let mut max_offset: i64 = -1;
        let count = self.store.recover(&mut |record| {
            max_offset = record.message_offset as i64;
            callback(record);
        })?;

        self.current_offset.store(max_offset, Ordering::SeqCst);
        self.persisted_offset.store(max_offset, Ordering::SeqCst);
        info!("{count} messages recovered, current message offset: {max_offset}");
        Ok(count)
    }

    /// Highest assigned global offset, `-1` while the log is empty.
    pub fn current_offset(&self) -> i64 {
        self.current_offset.load(Ordering::SeqCst)
    }

    pub fn persisted_offset(&self) -> i64 {
        self.persisted_offset.load(Ordering::SeqCst)
    }

    /// Raise the safe-delete bound for one queue; bounds only move forward.
    pub fn update_safe_delete_offset(&self, topic: &str, queue_id: u32, queue_offset: u64) {
        self.safe_delete_offsets
            .entry((topic.to_string(), queue_id))
            .and_modify(|current| {
                if queue_offset > *current {
                    *current = queue_offset;
                }
            })
            .or_insert(queue_offset);
    }

    /// Flush one bounded batch of unpersisted records. Returns how many
    /// records became durable; on storage failure everything stays resident
    /// for the next cycle.
    pub fn flush_unpersisted(&self) -> usize {
        // Serialize flushers: the periodic sweep and an explicit flush must
        // not both append the same frontier range.
        let _guard = self.flush_lock.lock();
        let current = self.current_offset.load(Ordering::SeqCst);
        let persisted = self.persisted_offset.load(Ordering::SeqCst);

        let mut batch = Vec::new();
        let mut offset = persisted + 1;
        while offset <= current && batch.len() < self.persist_batch_max {
            match self.resident.get(&(offset as u64)) {
                Some(record) => batch.push(record.clone()),
                // A reservation that is not visible yet; stop at the hole so
                // the flush frontier never skips a record.
                None => break,
            }
            offset += 1;
        }

        if batch.is_empty() {
            return 0;
        }

        let max_offset = batch.last().map(|r| r.message_offset).unwrap_or(0);
        match self.store.append_batch(&batch) {
            Ok(()) => {
                self.persisted_offset
                    .store(max_offset as i64, Ordering::SeqCst);
                for record in &batch {
                    self.resident.remove(&record.message_offset);
                }
                debug!(
                    "Flushed {} messages, max message offset: {max_offset}",
                    batch.len()
                );
                batch.len()
            }
            Err(e) => {
                warn!(
                    "Failed to flush {} messages, will retry next cycle: {e}",
                    batch.len()
                );
                0
            }
        }
    }

    /// Run the durable delete pass for every queue with a safe-delete bound,
    /// and evict already-persisted resident records under that bound.
    pub fn purge_deletable(&self) -> usize {
        let mut total_removed = 0;
        let bounds: Vec<((String, u32), u64)> = self
            .safe_delete_offsets
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        for ((topic, queue_id), bound) in bounds {
            match self.store.delete_below(&topic, queue_id, bound) {
                Ok(removed) => total_removed += removed,
                Err(e) => {
                    warn!("Delete pass failed for {topic}/{queue_id}: {e}");
                    continue;
                }
            }

            let persisted = self.persisted_offset.load(Ordering::SeqCst);
            self.resident.retain(|message_offset, record| {
                !(record.topic == topic
                    && record.queue_id == queue_id
                    && record.queue_offset < bound
                    && *message_offset as i64 <= persisted)
            });
        }
        total_removed
    }

    pub fn start(self: &Arc<Self>, settings: &BrokerSettings) {
        let flush_log = Arc::downgrade(self);
        *self.flush_task.lock() = Some(PeriodicTask::spawn(
            "message-log-flush",
            settings.persist_message_interval,
            move || {
                if let Some(log) = flush_log.upgrade() {
                    log.flush_unpersisted();
                }
            },
        ));

        let delete_log = Arc::downgrade(self);
        *self.delete_task.lock() = Some(PeriodicTask::spawn(
            "message-log-delete",
            settings.delete_message_interval,
            move || {
                if let Some(log) = delete_log.upgrade() {
                    if log.is_time_to_delete() {
                        log.purge_deletable();
                    }
                }
            },
        ));
    }

    pub fn shutdown(&self) {
        self.flush_task.lock().take();
        self.delete_task.lock().take();
        // Drain whatever is still unpersisted; a storage failure here is
        // already logged and ends the drain.
        while self.flush_unpersisted() > 0 {}
    }

    fn is_time_to_delete(&self) -> bool {
        match self.delete_hour_of_day {
            None => true,
            Some(hour) => chrono::Local::now().hour() == hour,
        }
    }
}
