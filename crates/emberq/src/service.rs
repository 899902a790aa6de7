use std::sync::Arc;
use std::time::Duration;

use emberq_storage::{Message, StorageBackend, StoredMessage};
use log::{debug, info};
use parking_lot::Mutex;

use crate::config::BrokerSettings;
use crate::error::BrokerError;
use crate::groups::ConsumerGroupRegistry;
use crate::message_log::MessageLog;
use crate::offsets::CheckpointManager;
use crate::pull::{
    PendingPull, PullCoordinator, PullOutcome, PullReplyReceiver, PullReplySender,
    PullResolution, PullResolutionHandler, pull_reply_channel,
};
use crate::queue::QueueRegistry;
use crate::task::PeriodicTask;

/// Where a group starts when it has no checkpoint for a queue yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeFrom {
    /// The earliest offset still retained.
    Earliest,
    /// The next offset after the queue's current one.
    Latest,
}

/// A decoded pull request as the transport hands it over. A negative
/// `queue_offset` asks for the group's resume offset instead of data.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub topic: String,
    pub queue_id: u32,
    pub queue_offset: i64,
    pub consumer_group: String,
    pub channel_id: String,
    pub batch_size: usize,
    pub consume_from: ConsumeFrom,
    pub suspend_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStoreResult {
    pub message_offset: u64,
    pub queue_id: u32,
    pub queue_offset: u64,
}

/// Shared pull logic: fetching available messages and turning an empty fetch
/// into the right terminal outcome. Used on the synchronous path and, via
/// [`PullResolutionHandler`], when a suspended request resolves on a notify
/// or sweep thread.
struct PullDelivery {
    queues: Arc<QueueRegistry>,
    log: Arc<MessageLog>,
    groups: Arc<ConsumerGroupRegistry>,
}

impl PullDelivery {
    /// Collect up to `batch_size` contiguous available messages starting at
    /// `pull_offset`, skipping index gaps.
    fn fetch_messages(
        &self,
        topic: &str,
        queue_id: u32,
        pull_offset: u64,
        batch_size: usize,
    ) -> Vec<StoredMessage> {
        let Some(queue) = self.queues.queue(topic, queue_id) else {
            return Vec::new();
        };

        let mut messages = Vec::new();
        let end = pull_offset.saturating_add(batch_size as u64);
        for queue_offset in pull_offset..end {
            if let Some(message_offset) = queue.get_item(queue_offset) {
                if let Some(message) = self.log.get(message_offset) {
                    messages.push(message);
                }
            }
        }
        messages
    }

    /// Terminal outcome for a pull that found nothing: correct an
    /// out-of-range offset, otherwise report no new message.
    fn reset_or_no_new_message(&self, topic: &str, queue_id: u32, pull_offset: u64) -> PullOutcome {
        let (min_offset, current_offset) = match self.queues.queue(topic, queue_id) {
            Some(queue) => (
                queue.min_offset().map(|v| v as i64).unwrap_or(-1),
                queue.current_offset(),
            ),
            None => (-1, -1),
        };

        let pull_offset = pull_offset as i64;
        if pull_offset < min_offset {
            PullOutcome::NextOffsetReset(min_offset as u64)
        } else if pull_offset > current_offset + 1 {
            PullOutcome::NextOffsetReset((current_offset + 1) as u64)
        } else {
            PullOutcome::NoNewMessage
        }
    }

    fn execute_pull(&self, request: &PendingPull) -> PullOutcome {
        let messages = self.fetch_messages(
            &request.topic,
            request.queue_id,
            request.pull_offset,
            request.batch_size,
        );
        if !messages.is_empty() {
            return PullOutcome::Found(messages);
        }
        self.reset_or_no_new_message(&request.topic, request.queue_id, request.pull_offset)
    }
}

impl PullResolutionHandler for PullDelivery {
    fn on_resolved(&self, request: &PendingPull, resolution: PullResolution) {
        // Liveness re-check at resolution time: a departed channel gets no
        // response at all.
        if !self
            .groups
            .is_active(&request.consumer_group, &request.channel_id)
        {
            debug!(
                "Suppressed pull response for inactive channel {}, group {}",
                request.channel_id, request.consumer_group
            );
            return;
        }

        let outcome = match resolution {
            PullResolution::Replaced => PullOutcome::Ignored,
            PullResolution::NewMessageArrived | PullResolution::TimedOut => {
                self.execute_pull(request)
            }
        };
        request.reply.send(outcome);
    }
}

/// Ingestion/retrieval façade: composes the message log, queue registry,
/// checkpoint manager, consumer-group registry and pull coordinator into the
/// produce and pull operations the transport calls.
pub struct BrokerService {
    settings: BrokerSettings,
    queues: Arc<QueueRegistry>,
    log: Arc<MessageLog>,
    checkpoints: Arc<CheckpointManager>,
    groups: Arc<ConsumerGroupRegistry>,
    coordinator: Arc<PullCoordinator>,
    delivery: Arc<PullDelivery>,
    retention_task: Mutex<Option<PeriodicTask>>,
}

impl BrokerService {
    pub fn new(settings: BrokerSettings, backend: &StorageBackend) -> Result<Self, BrokerError> {
        let log_store = backend.create_log_store()?;
        let checkpoint_store = backend.create_checkpoint_store()?;

        let queues = Arc::new(QueueRegistry::new(settings.default_queue_count));
        let log = Arc::new(MessageLog::new(log_store, &settings));
        let checkpoints = Arc::new(CheckpointManager::new(
            checkpoint_store,
            settings.persist_checkpoint_interval,
        ));
        let groups = Arc::new(ConsumerGroupRegistry::new(
            settings.consumer_timeout,
            settings.scan_stale_consumer_interval,
        ));
        let delivery = Arc::new(PullDelivery {
            queues: queues.clone(),
            log: log.clone(),
            groups: groups.clone(),
        });
        let coordinator = Arc::new(PullCoordinator::new(
            delivery.clone(),
            settings.pull_expiry_interval,
        ));

        Ok(BrokerService {
            settings,
            queues,
            log,
            checkpoints,
            groups,
            coordinator,
            delivery,
            retention_task: Mutex::new(None),
        })
    }

    /// Recover durable state, then launch every scheduled sweep.
    #[tracing::instrument(level = "info", skip_all)]
    pub fn start(&self) -> Result<(), BrokerError> {
        let queues = self.queues.clone();
        self.log.recover(|record| {
            queues
                .ensure_queue(&record.topic, record.queue_id)
                .recover_item(record);
        })?;
        self.checkpoints.recover()?;

        self.log.start(&self.settings);
        self.checkpoints.start();
        self.groups.start();
        self.coordinator.start();

        let queues = self.queues.clone();
        let checkpoints = self.checkpoints.clone();
        let log = self.log.clone();
        *self.retention_task.lock() = Some(PeriodicTask::spawn(
            "retention-sweep",
            self.settings.remove_consumed_interval,
            move || {
                Self::sweep_consumed(&queues, &checkpoints, &log);
            },
        ));

        info!("Broker service started");
        Ok(())
    }

    /// Stop every scheduled task before the shared registries go away.
    pub fn shutdown(&self) {
        self.retention_task.lock().take();
        self.coordinator.shutdown();
        self.groups.shutdown();
        self.checkpoints.shutdown();
        self.log.shutdown();
        info!("Broker service stopped");
    }

    /// Validate, sequence, append and index one message, then wake any
    /// suspended pulls on its queue.
    pub fn store_message(
        &self,
        message: Message,
        queue_id: u32,
    ) -> Result<MessageStoreResult, BrokerError> {
        let queues = self.queues.get_or_create(&message.topic);
        if queue_id as usize >= queues.len() {
            return Err(BrokerError::InvalidQueueId {
                topic: message.topic,
                queue_id,
                queue_count: queues.len(),
            });
        }

        let queue = &queues[queue_id as usize];
        let queue_offset = queue.reserve_next_offset();
        let topic = message.topic.clone();
        let stored = self.log.append(queue_id, queue_offset, message);
        queue.insert_index(queue_offset, stored.message_offset);

        let result = MessageStoreResult {
            message_offset: stored.message_offset,
            queue_id,
            queue_offset,
        };

        // Notify after commit: best effort, no transaction spans append,
        // index and delivery.
        self.coordinator
            .notify_new_message(&topic, queue_id, queue_offset as i64);
        Ok(result)
    }

    /// The full pull decision tree. The receiver observes exactly one of the
    /// wire outcomes, or sender-gone if delivery was suppressed.
    pub fn pull_messages(&self, request: PullRequest) -> PullReplyReceiver {
        let (reply, receiver) = pull_reply_channel();

        // First pull of a group: hand back its resume offset, no data fetch.
        if request.queue_offset < 0 {
            let next = self.next_consume_offset(
                &request.topic,
                request.queue_id,
                &request.consumer_group,
                request.consume_from,
            );
            reply.send(PullOutcome::NextOffsetReset(next));
            return receiver;
        }

        let pull_offset = request.queue_offset as u64;
        let messages = self.delivery.fetch_messages(
            &request.topic,
            request.queue_id,
            pull_offset,
            request.batch_size,
        );
        if !messages.is_empty() {
            reply.send(PullOutcome::Found(messages));
            return receiver;
        }

        let suspend_ms = request.suspend_ms.unwrap_or(0);
        if suspend_ms > 0 {
            self.suspend_pull(request, pull_offset, suspend_ms, reply);
            return receiver;
        }

        reply.send(self.delivery.reset_or_no_new_message(
            &request.topic,
            request.queue_id,
            pull_offset,
        ));
        receiver
    }

    fn suspend_pull(
        &self,
        request: PullRequest,
        pull_offset: u64,
        suspend_ms: u64,
        reply: PullReplySender,
    ) {
        let topic = request.topic.clone();
        let queue_id = request.queue_id;
        let suspend = Duration::from_millis(suspend_ms).min(self.settings.max_pull_suspend);
        let pending = PendingPull::new(
            request.topic,
            queue_id,
            pull_offset,
            request.batch_size,
            request.consumer_group,
            request.channel_id,
            suspend,
            reply,
        );
        self.coordinator.suspend(pending);

        // Close the race with an append that landed between the empty fetch
        // and the registration.
        if let Some(queue) = self.queues.queue(&topic, queue_id) {
            self.coordinator
                .notify_new_message(&topic, queue_id, queue.current_offset());
        }
    }

    /// Resume offset for a group joining (or rejoining) a queue, from its
    /// checkpoint and the from-where policy.
    fn next_consume_offset(
        &self,
        topic: &str,
        queue_id: u32,
        group: &str,
        consume_from: ConsumeFrom,
    ) -> u64 {
        let queue = self.queues.queue(topic, queue_id);
        let current_offset = queue
            .as_ref()
            .map(|q| q.current_offset())
            .unwrap_or(-1);

        if let Some(last_acked) = self.checkpoints.checkpoint(topic, queue_id, group) {
            // A checkpoint ahead of the queue clamps to the next real offset.
            if current_offset < last_acked as i64 {
                return (current_offset + 1).max(0) as u64;
            }
            return last_acked + 1;
        }

        match consume_from {
            ConsumeFrom::Earliest => queue.and_then(|q| q.min_offset()).unwrap_or(0),
            ConsumeFrom::Latest => {
                if current_offset < 0 {
                    0
                } else {
                    current_offset as u64 + 1
                }
            }
        }
    }

    /// Acknowledge consumption up to `offset` for a group.
    pub fn update_checkpoint(&self, topic: &str, queue_id: u32, group: &str, offset: u64) {
        self.checkpoints
            .update_checkpoint(topic, queue_id, group, offset);
    }

    pub fn register_consumer(&self, group: &str, channel_id: &str, subscriptions: Vec<String>) {
        self.groups.register(group, channel_id, subscriptions);
    }

    pub fn consumer_heartbeat(&self, group: &str, channel_id: &str) -> bool {
        self.groups.heartbeat(group, channel_id)
    }

    /// The transport reports a connection gone.
    pub fn remove_consumer_channel(&self, channel_id: &str) {
        self.groups.remove_channel(channel_id);
    }

    pub fn queue_current_offset(&self, topic: &str, queue_id: u32) -> i64 {
        self.queues
            .queue(topic, queue_id)
            .map(|q| q.current_offset())
            .unwrap_or(-1)
    }

    pub fn queue_min_offset(&self, topic: &str, queue_id: u32) -> i64 {
        self.queues
            .queue(topic, queue_id)
            .and_then(|q| q.min_offset())
            .map(|v| v as i64)
            .unwrap_or(-1)
    }

    pub fn topic_queue_count(&self, topic: &str) -> usize {
        self.queues
            .queue_count(topic)
            .unwrap_or(self.settings.default_queue_count as usize)
    }

    pub fn consumer_groups(&self) -> &Arc<ConsumerGroupRegistry> {
        &self.groups
    }

    /// One retention pass, also run by the scheduled sweep: clamp each
    /// queue's min checkpoint to its current offset, trim the resident
    /// index below it and push the bound into the log's deletion policy.
    pub fn run_retention_sweep(&self) {
        Self::sweep_consumed(&self.queues, &self.checkpoints, &self.log);
    }

    /// Trigger the log's durable delete pass immediately, ignoring the
    /// hour-of-day gate. Exposed for operational tooling and tests.
    pub fn run_delete_pass(&self) -> usize {
        self.log.purge_deletable()
    }

    /// Flush unpersisted log records now instead of waiting for the sweep.
    pub fn flush_log(&self) -> usize {
        let mut flushed = 0;
        loop {
            let n = self.log.flush_unpersisted();
            if n == 0 {
                break;
            }
            flushed += n;
        }
        flushed
    }

    fn sweep_consumed(
        queues: &Arc<QueueRegistry>,
        checkpoints: &Arc<CheckpointManager>,
        log: &Arc<MessageLog>,
    ) {
        for (topic, topic_queues) in queues.snapshot() {
            for queue in topic_queues {
                let Some(min_checkpoint) = checkpoints.min_checkpoint(&topic, queue.queue_id())
                else {
                    continue;
                };
                let bound = (min_checkpoint as i64).min(queue.current_offset());
                if bound < 0 {
                    continue;
                }
                queue.remove_items_below(bound as u64);
                log.update_safe_delete_offset(&topic, queue.queue_id(), bound as u64);
            }
        }
    }
}
