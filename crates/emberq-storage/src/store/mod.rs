pub mod file;
pub mod memory;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::StoredMessage;
use crate::error::StorageError;

pub use memory::{MemoryCheckpointStore, MemoryLogStore};

/// Durable backend for the broker's message log.
///
/// The broker owns offset assignment and the resident window; implementations
/// only have to persist what they are given and hand it back in
/// `message_offset` order.
pub trait LogStore: Send + Sync {
    /// Persist a batch of records. The whole batch either becomes durable or
    /// is retried by the caller on the next flush cycle.
    fn append_batch(&self, records: &[StoredMessage]) -> Result<(), StorageError>;

    /// Replay every durable record in ascending `message_offset` order.
    /// Returns the number of records replayed.
    fn recover(&self, callback: &mut dyn FnMut(&StoredMessage)) -> Result<usize, StorageError>;

    /// Load a contiguous chunk of records with
    /// `message_offset` in `[start_offset, start_offset + count)`.
    fn batch_load(&self, start_offset: u64, count: usize)
    -> Result<Vec<StoredMessage>, StorageError>;

    /// Delete records of one queue with `queue_offset` strictly below the
    /// bound. Returns the number of records removed.
    fn delete_below(
        &self,
        topic: &str,
        queue_id: u32,
        queue_offset: u64,
    ) -> Result<usize, StorageError>;
}

/// Durable snapshot of every consumer group's acknowledged positions,
/// keyed group -> queue key (see [`queue_key`]) -> last acked queue offset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    pub groups: HashMap<String, HashMap<String, u64>>,
}

pub trait CheckpointStore: Send + Sync {
    fn persist(&self, snapshot: &CheckpointSnapshot) -> Result<(), StorageError>;
    fn load(&self) -> Result<CheckpointSnapshot, StorageError>;
}

pub fn queue_key(topic: &str, queue_id: u32) -> String {
    format!("{topic}--{queue_id}")
}

pub fn parse_queue_key(key: &str) -> Option<(String, u32)> {
    key.rsplit_once("--").and_then(|(topic, queue_str)| {
        queue_str
            .parse::<u32>()
            .ok()
            .map(|queue_id| (topic.to_string(), queue_id))
    })
}
