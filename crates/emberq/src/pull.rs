use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use emberq_storage::StoredMessage;
use log::debug;
use parking_lot::Mutex;

use crate::task::PeriodicTask;

/// Consumer-visible result of a pull. The variants are part of the wire
/// compatibility contract; payload serialization is the transport's concern.
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    Found(Vec<StoredMessage>),
    NoNewMessage,
    NextOffsetReset(u64),
    Ignored,
}

/// Sending half of a pull response: invokable at most once, and a no-op once
/// the receiving side (the connection) is gone.
pub struct PullReplySender {
    inner: Mutex<Option<SyncSender<PullOutcome>>>,
}

impl PullReplySender {
    pub fn send(&self, outcome: PullOutcome) {
        if let Some(tx) = self.inner.lock().take() {
            // Capacity one and a single send: this never blocks. A dropped
            // receiver just swallows the response.
            if let Err(TrySendError::Disconnected(_)) = tx.try_send(outcome) {
                debug!("Pull response dropped, receiver already gone");
            }
        }
    }
}

pub struct PullReplyReceiver {
    rx: Receiver<PullOutcome>,
}

impl PullReplyReceiver {
    /// Wait for the outcome; `None` once the sender is gone without ever
    /// responding (suppressed delivery).
    pub fn recv(&self) -> Option<PullOutcome> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<PullOutcome, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<PullOutcome> {
        self.rx.try_recv().ok()
    }
}

pub fn pull_reply_channel() -> (PullReplySender, PullReplyReceiver) {
    let (tx, rx) = mpsc::sync_channel(1);
    (
        PullReplySender {
            inner: Mutex::new(Some(tx)),
        },
        PullReplyReceiver { rx },
    )
}

/// Why a pending pull left the Pending state. Liveness of the owning channel
/// is re-checked at delivery time, so `Invalidated` is decided by the
/// resolution handler rather than carried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullResolution {
    NewMessageArrived,
    TimedOut,
    Replaced,
}

/// A suspended read request. Lives only inside the [`PullCoordinator`]; the
/// atomic `resolved` guard makes a notify/timeout race resolve exactly once.
pub struct PendingPull {
    pub topic: String,
    pub queue_id: u32,
    pub pull_offset: u64,
    pub batch_size: usize,
    pub consumer_group: String,
    pub channel_id: String,
    pub suspend: Duration,
    pub suspended_at: Instant,
    resolved: AtomicBool,
    pub reply: PullReplySender,
}

impl PendingPull {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: String,
        queue_id: u32,
        pull_offset: u64,
        batch_size: usize,
        consumer_group: String,
        channel_id: String,
        suspend: Duration,
        reply: PullReplySender,
    ) -> Self {
        PendingPull {
            topic,
            queue_id,
            pull_offset,
            batch_size,
            consumer_group,
            channel_id,
            suspend,
            suspended_at: Instant::now(),
            resolved: AtomicBool::new(false),
            reply,
        }
    }

    /// First caller wins; whichever transition takes the guard is
    /// authoritative.
    fn mark_resolved(&self) -> bool {
        !self.resolved.swap(true, Ordering::SeqCst)
    }

    fn is_expired(&self) -> bool {
        self.suspended_at.elapsed() >= self.suspend
    }
}

/// Builds and delivers the terminal response for a resolved pull. Delivery
/// may block on I/O, so the coordinator never invokes this while holding a
/// registry lock.
pub trait PullResolutionHandler: Send + Sync {
    fn on_resolved(&self, request: &PendingPull, resolution: PullResolution);
}

type QueueKey = (String, u32);

/// Holds suspended pull requests and resolves each exactly once: on new
/// data, on deadline expiry, or on replacement by a newer request from the
/// same channel.
pub struct PullCoordinator {
    pending: DashMap<QueueKey, HashMap<String, Arc<PendingPull>>>,
    handler: Arc<dyn PullResolutionHandler>,
    expiry_interval: Duration,
    expiry_task: Mutex<Option<PeriodicTask>>,
}

impl PullCoordinator {
    pub fn new(handler: Arc<dyn PullResolutionHandler>, expiry_interval: Duration) -> Self {
        PullCoordinator {
            pending: DashMap::new(),
            handler,
            expiry_interval,
            expiry_task: Mutex::new(None),
        }
    }

    /// Register a request under (topic, queue). A pending request from the
    /// same channel is superseded and resolved as Replaced.
    pub fn suspend(&self, request: PendingPull) {
        let key = (request.topic.clone(), request.queue_id);
        let channel_id = request.channel_id.clone();
        let request = Arc::new(request);

        let replaced = {
            let mut slot = self.pending.entry(key).or_default();
            slot.insert(channel_id, request)
        };

        // Outside the map lock: replacement delivery may block.
        if let Some(previous) = replaced {
            if previous.mark_resolved() {
                self.handler
                    .on_resolved(&previous, PullResolution::Replaced);
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.iter().map(|entry| entry.value().len()).sum()
    }

    /// Called after every successful append. Resolves the snapshot of
    /// requests whose offset is now satisfiable; `max_available` is the
    /// queue's highest indexed offset.
    pub fn notify_new_message(&self, topic: &str, queue_id: u32, max_available: i64) {
        let key = (topic.to_string(), queue_id);
        let snapshot: Vec<Arc<PendingPull>> = match self.pending.get(&key) {
            Some(slot) => slot.values().cloned().collect(),
            None => return,
        };

        for request in snapshot {
            if request.pull_offset as i64 <= max_available {
                self.take_and_resolve(&key, &request, PullResolution::NewMessageArrived);
            }
        }
    }

    /// Scheduled sweep: resolve every request whose deadline has elapsed.
    pub fn expire_timed_out(&self) {
        let keys: Vec<QueueKey> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            let snapshot: Vec<Arc<PendingPull>> = match self.pending.get(&key) {
                Some(slot) => slot.values().cloned().collect(),
                None => continue,
            };
            for request in snapshot {
                if request.is_expired() {
                    self.take_and_resolve(&key, &request, PullResolution::TimedOut);
                }
            }
        }
    }

    fn take_and_resolve(&self, key: &QueueKey, request: &Arc<PendingPull>, resolution: PullResolution) {
        if !request.mark_resolved() {
            return;
        }

        if let Some(mut slot) = self.pending.get_mut(key) {
            // Only unregister if the slot still holds this request; a
            // replacement may already occupy it.
            let owns_slot = slot
                .get(&request.channel_id)
                .is_some_and(|current| Arc::ptr_eq(current, request));
            if owns_slot {
                slot.remove(&request.channel_id);
            }
        }
        self.pending.remove_if(key, |_, slot| slot.is_empty());

        // Map locks released; delivery is free to block.
        self.handler.on_resolved(request, resolution);
    }

    pub fn start(self: &Arc<Self>) {
        let coordinator = Arc::downgrade(self);
        *self.expiry_task.lock() = Some(PeriodicTask::spawn(
            "pull-request-expiry",
            self.expiry_interval,
            move || {
                if let Some(coordinator) = coordinator.upgrade() {
                    coordinator.expire_timed_out();
                }
            },
        ));
    }

    /// Stop the expiry sweep and drop whatever is still pending; their reply
    /// senders go with them, which the transport observes as a gone
    /// connection.
    pub fn shutdown(&self) {
        self.expiry_task.lock().take();
        self.pending.clear();
    }
}
