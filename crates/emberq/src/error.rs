use std::fmt;

use emberq_storage::StorageError;

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    InvalidQueueId {
        topic: String,
        queue_id: u32,
        queue_count: usize,
    },
    Storage(StorageError),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::InvalidQueueId {
                topic,
                queue_id,
                queue_count,
            } => {
                write!(
                    f,
                    "Invalid queue id {queue_id} for topic '{topic}', queue count is {queue_count}"
                )
            }
            BrokerError::Storage(err) => write!(f, "Storage error: {err}"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<StorageError> for BrokerError {
    fn from(err: StorageError) -> Self {
        BrokerError::Storage(err)
    }
}

impl BrokerError {
    /// Errors the caller can fix; everything else is broker-side.
    pub fn is_client_error(&self) -> bool {
        matches!(self, BrokerError::InvalidQueueId { .. })
    }
}
