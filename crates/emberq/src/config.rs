use std::time::Duration;

/// Tunables for the broker core. Construction-time only; the transport and
/// bootstrap layers own how these get populated.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Queues created lazily for a topic on first use.
    pub default_queue_count: u32,
    /// How often unpersisted log records are flushed to the durable store.
    pub persist_message_interval: Duration,
    /// Upper bound on records flushed per cycle.
    pub persist_batch_max: usize,
    /// Records loaded per durable read when the resident window misses.
    pub batch_load_size: usize,
    /// How often the durable delete pass runs.
    pub delete_message_interval: Duration,
    /// Restrict deletion to one local hour of the day; `None` = any time.
    pub delete_message_hour_of_day: Option<u32>,
    /// How often consumed messages are trimmed and delete bounds pushed.
    pub remove_consumed_interval: Duration,
    /// How often checkpoint state is persisted.
    pub persist_checkpoint_interval: Duration,
    /// How often stale consumer channels are scanned for.
    pub scan_stale_consumer_interval: Duration,
    /// Heartbeat age after which a consumer channel is evicted.
    pub consumer_timeout: Duration,
    /// How often suspended pull requests are checked for expiry.
    pub pull_expiry_interval: Duration,
    /// Ceiling on how long one pull may stay suspended, whatever the client
    /// asked for.
    pub max_pull_suspend: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            default_queue_count: 4,
            persist_message_interval: Duration::from_millis(500),
            persist_batch_max: 1000,
            batch_load_size: 1000,
            delete_message_interval: Duration::from_secs(300),
            delete_message_hour_of_day: None,
            remove_consumed_interval: Duration::from_secs(30),
            persist_checkpoint_interval: Duration::from_secs(5),
            scan_stale_consumer_interval: Duration::from_secs(1),
            consumer_timeout: Duration::from_secs(30),
            pull_expiry_interval: Duration::from_millis(250),
            max_pull_suspend: Duration::from_secs(60),
        }
    }
}
