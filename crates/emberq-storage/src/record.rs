use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Producer-supplied payload. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub body: Vec<u8>,
    pub created_time: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, body: Vec<u8>) -> Self {
        Message {
            topic: topic.into(),
            body,
            created_time: Utc::now(),
        }
    }
}

/// A message as it lives in the durable log: globally sequenced and bound to
/// its queue position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_offset: u64,
    pub topic: String,
    pub queue_id: u32,
    pub queue_offset: u64,
    pub body: Vec<u8>,
    pub stored_time: DateTime<Utc>,
}

impl StoredMessage {
    pub fn from_message(
        message: Message,
        message_offset: u64,
        queue_id: u32,
        queue_offset: u64,
    ) -> Self {
        StoredMessage {
            message_offset,
            topic: message.topic,
            queue_id,
            queue_offset,
            body: message.body,
            stored_time: Utc::now(),
        }
    }
}
