use std::time::Duration;

use emberq::{PullOutcome, PullRequest};
use test_log::test;

use super::test_utilities::*;

fn suspended(mut request: PullRequest, suspend_ms: u64) -> PullRequest {
    request.suspend_ms = Some(suspend_ms);
    request
}

#[test]
fn suspended_pull_resolves_when_a_message_arrives() {
    let broker = memory_broker();
    let topic = create_test_topic("longpoll");
    let group = create_test_group("longpoll");
    broker.register_consumer(&group, "ch-1", vec![topic.clone()]);

    let receiver =
        broker.pull_messages(suspended(pull_request(&topic, 0, &group, "ch-1"), 5000));
    broker.store_message(test_message(&topic, "wakeup"), 0).unwrap();

    match receiver.recv_timeout(Duration::from_secs(2)) {
        Ok(PullOutcome::Found(messages)) => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].body, b"wakeup");
        }
        other => panic!("Expected Found, got {other:?}"),
    }
    broker.shutdown();
}

#[test]
fn suspended_pull_times_out_with_no_new_message() {
    let broker = memory_broker();
    let topic = create_test_topic("timeout");
    let group = create_test_group("timeout");
    broker.register_consumer(&group, "ch-1", vec![topic.clone()]);
    broker.store_message(test_message(&topic, "only"), 0).unwrap();

    // Pulling past the head with a 200ms suspension: nothing arrives, so the
    // expiry sweep answers.
    let receiver =
        broker.pull_messages(suspended(pull_request(&topic, 1, &group, "ch-1"), 200));
    assert_eq!(
        receiver.recv_timeout(Duration::from_secs(2)),
        Ok(PullOutcome::NoNewMessage)
    );
    broker.shutdown();
}

#[test]
fn newer_pull_from_the_same_channel_supersedes_the_old_one() {
    let broker = memory_broker();
    let topic = create_test_topic("supersede");
    let group = create_test_group("supersede");
    broker.register_consumer(&group, "ch-1", vec![topic.clone()]);

    let first = broker.pull_messages(suspended(pull_request(&topic, 0, &group, "ch-1"), 5000));
    let second = broker.pull_messages(suspended(pull_request(&topic, 0, &group, "ch-1"), 5000));

    assert_eq!(
        first.recv_timeout(Duration::from_secs(2)),
        Ok(PullOutcome::Ignored)
    );

    broker.store_message(test_message(&topic, "late"), 0).unwrap();
    match second.recv_timeout(Duration::from_secs(2)) {
        Ok(PullOutcome::Found(messages)) => assert_eq!(messages[0].body, b"late"),
        other => panic!("Expected Found, got {other:?}"),
    }
    broker.shutdown();
}

#[test]
fn resolution_for_a_departed_channel_is_suppressed() {
    let broker = memory_broker();
    let topic = create_test_topic("departed");
    let group = create_test_group("departed");

    // Never registered: by resolution time the channel fails the liveness
    // check and the reply sender is simply dropped.
    let receiver =
        broker.pull_messages(suspended(pull_request(&topic, 0, &group, "ch-ghost"), 5000));
    broker.store_message(test_message(&topic, "unseen"), 0).unwrap();

    assert_eq!(receiver.recv(), None);
    broker.shutdown();
}

#[test]
fn suspended_pulls_on_different_queues_are_independent() {
    let broker = memory_broker();
    let topic = create_test_topic("queues");
    let group = create_test_group("queues");
    broker.register_consumer(&group, "ch-0", vec![topic.clone()]);
    broker.register_consumer(&group, "ch-1", vec![topic.clone()]);

    let mut on_queue_1 = pull_request(&topic, 0, &group, "ch-1");
    on_queue_1.queue_id = 1;
    let queue_0 = broker.pull_messages(suspended(pull_request(&topic, 0, &group, "ch-0"), 300));
    let queue_1 = broker.pull_messages(suspended(on_queue_1, 5000));

    // Data lands on queue 1 only; the queue-0 pull expires.
    broker.store_message(test_message(&topic, "q1"), 1).unwrap();

    match queue_1.recv_timeout(Duration::from_secs(2)) {
        Ok(PullOutcome::Found(messages)) => assert_eq!(messages[0].queue_id, 1),
        other => panic!("Expected Found, got {other:?}"),
    }
    assert_eq!(
        queue_0.recv_timeout(Duration::from_secs(2)),
        Ok(PullOutcome::NoNewMessage)
    );
    broker.shutdown();
}
