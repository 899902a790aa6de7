use emberq_storage::{Message, StoredMessage};
use uuid::Uuid;

/// Generate a unique test ID for isolating test data
pub fn generate_test_id() -> String {
    Uuid::new_v4().to_string().replace('-', "")
}

/// Create a temporary directory for testing using tempdir()
pub fn create_test_dir(prefix: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(&format!("emberq_{prefix}_"))
        .tempdir()
        .expect("Failed to create temporary directory")
}

/// Create a unique topic name for testing
pub fn create_test_topic(prefix: &str) -> String {
    let test_id = generate_test_id();
    format!("{prefix}_topic_{test_id}")
}

pub fn stored(topic: &str, message_offset: u64, queue_id: u32, queue_offset: u64) -> StoredMessage {
    StoredMessage::from_message(
        Message::new(topic, format!("m{message_offset}").into_bytes()),
        message_offset,
        queue_id,
        queue_offset,
    )
}
