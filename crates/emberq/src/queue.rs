use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use emberq_storage::StoredMessage;
use parking_lot::RwLock;

/// One partition of a topic: the per-queue offset sequence plus the resident
/// index window mapping `queue_offset` to the global `message_offset`.
///
/// `current_offset` is the highest reserved offset, `-1` while empty.
/// Offsets are handed out with a single atomic increment, so concurrent
/// producers get exactly 0, 1, 2, ... with no gaps or repeats.
pub struct Queue {
    topic: String,
    queue_id: u32,
    current_offset: AtomicI64,
    index: RwLock<BTreeMap<u64, u64>>,
}

impl Queue {
    pub fn new(topic: &str, queue_id: u32) -> Self {
        Queue {
            topic: topic.to_string(),
            queue_id,
            current_offset: AtomicI64::new(-1),
            index: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn queue_id(&self) -> u32 {
        self.queue_id
    }

    /// Atomically claim the next queue offset for an append.
    pub fn reserve_next_offset(&self) -> u64 {
        (self.current_offset.fetch_add(1, Ordering::SeqCst) + 1) as u64
    }

    pub fn insert_index(&self, queue_offset: u64, message_offset: u64) {
        self.index.write().insert(queue_offset, message_offset);
    }

    pub fn get_item(&self, queue_offset: u64) -> Option<u64> {
        self.index.read().get(&queue_offset).copied()
    }

    /// Drop resident index entries with `queue_offset` strictly below the
    /// bound. The backing records persist until the log's own delete pass.
    pub fn remove_items_below(&self, queue_offset: u64) -> usize {
        let mut index = self.index.write();
        let retained = index.split_off(&queue_offset);
        let removed = index.len();
        *index = retained;
        removed
    }

    /// Highest reserved queue offset, `-1` while the queue is empty.
    pub fn current_offset(&self) -> i64 {
        self.current_offset.load(Ordering::SeqCst)
    }

    /// Lowest queue offset still resident in the index window.
    pub fn min_offset(&self) -> Option<u64> {
        self.index.read().keys().next().copied()
    }

    /// Replay path: re-insert a recovered record and extend the sequence.
    /// Recovery replays in ascending global order, so the sequence stays
    /// contiguous.
    pub fn recover_item(&self, record: &StoredMessage) {
        self.index
            .write()
            .insert(record.queue_offset, record.message_offset);
        self.current_offset
            .fetch_max(record.queue_offset as i64, Ordering::SeqCst);
    }
}

/// Lazily creates and caches the queues of each topic.
pub struct QueueRegistry {
    topics: DashMap<String, Vec<Arc<Queue>>>,
    default_queue_count: u32,
}

impl QueueRegistry {
    pub fn new(default_queue_count: u32) -> Self {
        QueueRegistry {
            topics: DashMap::new(),
            default_queue_count,
        }
    }

    /// Idempotent: the first caller creates the configured number of queues,
    /// everyone else sees the same instances.
    pub fn get_or_create(&self, topic: &str) -> Vec<Arc<Queue>> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                (0..self.default_queue_count)
                    .map(|queue_id| Arc::new(Queue::new(topic, queue_id)))
                    .collect()
            })
            .value()
            .clone()
    }

    /// Recovery path: extend a topic's queue list when the durable log holds
    /// a queue id beyond the configured default.
    pub fn ensure_queue(&self, topic: &str, queue_id: u32) -> Arc<Queue> {
        let mut entry = self.topics.entry(topic.to_string()).or_insert_with(|| {
            (0..self.default_queue_count)
                .map(|id| Arc::new(Queue::new(topic, id)))
                .collect()
        });
        while entry.len() <= queue_id as usize {
            let next_id = entry.len() as u32;
            entry.push(Arc::new(Queue::new(topic, next_id)));
        }
        entry[queue_id as usize].clone()
    }

    pub fn queue(&self, topic: &str, queue_id: u32) -> Option<Arc<Queue>> {
        self.topics
            .get(topic)
            .and_then(|queues| queues.get(queue_id as usize).cloned())
    }

    pub fn queue_count(&self, topic: &str) -> Option<usize> {
        self.topics.get(topic).map(|queues| queues.len())
    }

    /// Snapshot of every (topic, queues) pair, for sweeps that must tolerate
    /// concurrent topic creation.
    pub fn snapshot(&self) -> Vec<(String, Vec<Arc<Queue>>)> {
        self.topics
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
