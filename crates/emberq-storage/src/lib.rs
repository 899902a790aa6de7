//! Durable-storage collaborators for the emberq broker core.
//!
//! The broker keeps a resident write-back window in memory and delegates
//! durability to a [`LogStore`] (the message records) and a
//! [`CheckpointStore`] (per-group consume positions). Both traits are
//! backend-agnostic; this crate ships an in-memory implementation for tests
//! and embedding, and a file-based one with exclusive data-directory locking.

pub mod backend;
pub mod error;
pub mod record;
pub mod store;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageErrorSource};
pub use record::{Message, StoredMessage};
pub use store::{
    CheckpointSnapshot, CheckpointStore, LogStore, MemoryCheckpointStore, MemoryLogStore,
    parse_queue_key, queue_key,
};
pub use store::file::{FileCheckpointStore, FileLogStore, SyncMode};
