//! Broker-side partitioned message log with pull-based consumption.
//!
//! Messages append to a single global log with strictly increasing offsets
//! and are indexed per (topic, queue) partition. Consumer groups pull by
//! queue offset, acknowledge progress through durable checkpoints, and may
//! long-poll: a pull that finds nothing can suspend on the broker until new
//! data arrives or its deadline passes. Retention deletes only what every
//! group has acknowledged.
//!
//! [`BrokerService`] is the entry point; storage backends live in the
//! `emberq-storage` crate.

pub mod config;
pub mod error;
pub mod groups;
pub mod message_log;
pub mod offsets;
pub mod pull;
pub mod queue;
pub mod service;
pub mod task;
pub mod telemetry;

pub use config::BrokerSettings;
pub use error::BrokerError;
pub use groups::{ConsumerGroup, ConsumerGroupRegistry};
pub use message_log::MessageLog;
pub use offsets::CheckpointManager;
pub use pull::{PullOutcome, PullReplyReceiver, PullResolution};
pub use queue::{Queue, QueueRegistry};
pub use service::{BrokerService, ConsumeFrom, MessageStoreResult, PullRequest};

// Re-export logging macros for consistent usage across the crate
pub use log::{debug, error, info, trace, warn};
