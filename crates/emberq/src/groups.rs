use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::task::PeriodicTask;

struct ChannelState {
    subscriptions: Vec<String>,
    last_heartbeat: Instant,
}

/// One consumer group: the channels sharing its consumption responsibility,
/// keyed by the stable channel identity the transport reports.
pub struct ConsumerGroup {
    name: String,
    channels: DashMap<String, ChannelState>,
}

impl ConsumerGroup {
    fn new(name: &str) -> Self {
        ConsumerGroup {
            name: name.to_string(),
            channels: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_channel_active(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }

    fn register(&self, channel_id: &str, subscriptions: Vec<String>) {
        self.channels
            .entry(channel_id.to_string())
            .and_modify(|state| {
                state.subscriptions = subscriptions.clone();
                state.last_heartbeat = Instant::now();
            })
            .or_insert_with(|| {
                info!(
                    "Consumer registered, group: {}, channel: {channel_id}",
                    self.name
                );
                ChannelState {
                    subscriptions,
                    last_heartbeat: Instant::now(),
                }
            });
    }

    fn heartbeat(&self, channel_id: &str) -> bool {
        match self.channels.get_mut(channel_id) {
            Some(mut state) => {
                state.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    fn remove_channel(&self, channel_id: &str) -> bool {
        self.channels.remove(channel_id).is_some()
    }

    fn remove_stale_channels(&self, timeout: Duration) -> usize {
        let stale: Vec<String> = self
            .channels
            .iter()
            .filter(|entry| entry.value().last_heartbeat.elapsed() > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for channel_id in stale {
            // Re-check under the entry so a concurrent heartbeat wins.
            let evicted = self
                .channels
                .remove_if(&channel_id, |_, state| {
                    state.last_heartbeat.elapsed() > timeout
                })
                .is_some();
            if evicted {
                warn!(
                    "Removed expired consumer, group: {}, channel: {channel_id}",
                    self.name
                );
                removed += 1;
            }
        }
        removed
    }
}

/// Tracks group membership and liveness; the scheduled sweep evicts channels
/// whose heartbeat has gone stale, independent of request handling.
pub struct ConsumerGroupRegistry {
    groups: DashMap<String, Arc<ConsumerGroup>>,
    consumer_timeout: Duration,
    scan_interval: Duration,
    sweep_task: Mutex<Option<PeriodicTask>>,
}

impl ConsumerGroupRegistry {
    pub fn new(consumer_timeout: Duration, scan_interval: Duration) -> Self {
        ConsumerGroupRegistry {
            groups: DashMap::new(),
            consumer_timeout,
            scan_interval,
            sweep_task: Mutex::new(None),
        }
    }

    /// Idempotent upsert; also refreshes the channel's heartbeat.
    pub fn register(&self, group: &str, channel_id: &str, subscriptions: Vec<String>) {
        let group = self
            .groups
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(ConsumerGroup::new(group)))
            .clone();
        group.register(channel_id, subscriptions);
    }

    /// Refresh the heartbeat only; unknown group/channel pairs are ignored.
    pub fn heartbeat(&self, group: &str, channel_id: &str) -> bool {
        self.groups
            .get(group)
            .map(|group| group.heartbeat(channel_id))
            .unwrap_or(false)
    }

    /// The transport reports a connection gone: drop the channel everywhere.
    pub fn remove_channel(&self, channel_id: &str) {
        for group in self.groups.iter() {
            if group.value().remove_channel(channel_id) {
                debug!(
                    "Removed consumer channel {channel_id} from group {}",
                    group.key()
                );
            }
        }
    }

    /// Gates delivery of suspended-pull results.
    pub fn is_active(&self, group: &str, channel_id: &str) -> bool {
        self.groups
            .get(group)
            .map(|group| group.is_channel_active(channel_id))
            .unwrap_or(false)
    }

    pub fn group(&self, name: &str) -> Option<Arc<ConsumerGroup>> {
        self.groups.get(name).map(|entry| entry.value().clone())
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn evict_stale_channels(&self) -> usize {
        let mut removed = 0;
        for group in self.groups.iter() {
            removed += group.value().remove_stale_channels(self.consumer_timeout);
        }
        removed
    }

    pub fn start(self: &Arc<Self>) {
        let registry = Arc::downgrade(self);
        *self.sweep_task.lock() = Some(PeriodicTask::spawn(
            "consumer-heartbeat-scan",
            self.scan_interval,
            move || {
                if let Some(registry) = registry.upgrade() {
                    registry.evict_stale_channels();
                }
            },
        ));
    }

    pub fn shutdown(&self) {
        self.sweep_task.lock().take();
    }
}
