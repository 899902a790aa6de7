use emberq::{BrokerError, ConsumeFrom, PullOutcome};
use test_log::test;

use super::test_utilities::*;

#[test]
fn store_assigns_global_and_per_queue_offsets() {
    let broker = memory_broker();
    let orders = create_test_topic("orders");
    let audit = create_test_topic("audit");

    let a = broker.store_message(test_message(&orders, "a"), 0).unwrap();
    let b = broker.store_message(test_message(&audit, "b"), 1).unwrap();
    let c = broker.store_message(test_message(&orders, "c"), 0).unwrap();

    // Global offsets are monotonic across topics; queue offsets restart per
    // queue.
    assert_eq!(
        (a.message_offset, b.message_offset, c.message_offset),
        (0, 1, 2)
    );
    assert_eq!((a.queue_offset, c.queue_offset), (0, 1));
    assert_eq!(b.queue_offset, 0);

    assert_eq!(broker.queue_current_offset(&orders, 0), 1);
    assert_eq!(broker.queue_current_offset(&audit, 1), 0);
    broker.shutdown();
}

#[test]
fn store_rejects_a_queue_id_out_of_range() {
    let broker = memory_broker();
    let topic = create_test_topic("invalid_queue");

    let error = broker
        .store_message(test_message(&topic, "x"), 99)
        .unwrap_err();
    match &error {
        BrokerError::InvalidQueueId {
            queue_id,
            queue_count,
            ..
        } => {
            assert_eq!(*queue_id, 99);
            assert_eq!(*queue_count, 4);
        }
        other => panic!("Expected InvalidQueueId, got {other:?}"),
    }
    assert!(error.is_client_error());
    broker.shutdown();
}

#[test]
fn pull_returns_stored_messages_in_order() {
    let broker = memory_broker();
    let topic = create_test_topic("pull");
    let group = create_test_group("pull");
    for i in 0..3 {
        broker
            .store_message(test_message(&topic, &format!("m{i}")), 0)
            .unwrap();
    }

    let receiver = broker.pull_messages(pull_request(&topic, 0, &group, "ch-1"));
    match receiver.recv() {
        Some(PullOutcome::Found(messages)) => {
            let bodies: Vec<_> = messages.iter().map(|m| m.body.clone()).collect();
            assert_eq!(bodies, vec![b"m0".to_vec(), b"m1".to_vec(), b"m2".to_vec()]);
            assert_eq!(messages[2].queue_offset, 2);
        }
        other => panic!("Expected Found, got {other:?}"),
    }
    broker.shutdown();
}

#[test]
fn pull_at_the_head_reports_no_new_message() {
    let broker = memory_broker();
    let topic = create_test_topic("head");
    let group = create_test_group("head");
    for i in 0..3 {
        broker
            .store_message(test_message(&topic, &format!("m{i}")), 0)
            .unwrap();
    }

    let receiver = broker.pull_messages(pull_request(&topic, 3, &group, "ch-1"));
    assert_eq!(receiver.recv(), Some(PullOutcome::NoNewMessage));
    broker.shutdown();
}

#[test]
fn pull_beyond_the_head_is_reset_to_the_next_offset() {
    let broker = memory_broker();
    let topic = create_test_topic("beyond");
    let group = create_test_group("beyond");
    for i in 0..3 {
        broker
            .store_message(test_message(&topic, &format!("m{i}")), 0)
            .unwrap();
    }

    let receiver = broker.pull_messages(pull_request(&topic, 10, &group, "ch-1"));
    assert_eq!(receiver.recv(), Some(PullOutcome::NextOffsetReset(3)));
    broker.shutdown();
}

#[test]
fn pull_on_an_unknown_topic_reports_no_new_message() {
    let broker = memory_broker();
    let topic = create_test_topic("unknown");
    let group = create_test_group("unknown");

    let receiver = broker.pull_messages(pull_request(&topic, 0, &group, "ch-1"));
    assert_eq!(receiver.recv(), Some(PullOutcome::NoNewMessage));
    broker.shutdown();
}

#[test]
fn negative_offset_asks_for_the_resume_offset() {
    let broker = memory_broker();
    let topic = create_test_topic("resume");
    let group = create_test_group("resume");
    for i in 0..4 {
        broker
            .store_message(test_message(&topic, &format!("m{i}")), 0)
            .unwrap();
    }

    // No checkpoint yet: the from-where policy decides.
    let latest = broker.pull_messages(pull_request(&topic, -1, &group, "ch-1"));
    assert_eq!(latest.recv(), Some(PullOutcome::NextOffsetReset(4)));

    let mut earliest_request = pull_request(&topic, -1, &group, "ch-1");
    earliest_request.consume_from = ConsumeFrom::Earliest;
    let earliest = broker.pull_messages(earliest_request);
    assert_eq!(earliest.recv(), Some(PullOutcome::NextOffsetReset(0)));

    // With a checkpoint the group resumes right after it.
    broker.update_checkpoint(&topic, 0, &group, 1);
    let resumed = broker.pull_messages(pull_request(&topic, -1, &group, "ch-1"));
    assert_eq!(resumed.recv(), Some(PullOutcome::NextOffsetReset(2)));
    broker.shutdown();
}

#[test]
fn topic_queue_count_defaults_until_the_topic_exists() {
    let broker = memory_broker();
    let topic = create_test_topic("count");

    assert_eq!(broker.topic_queue_count(&topic), 4);
    broker.store_message(test_message(&topic, "x"), 3).unwrap();
    assert_eq!(broker.topic_queue_count(&topic), 4);
    broker.shutdown();
}
