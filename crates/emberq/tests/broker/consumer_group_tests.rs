use std::time::Duration;

use emberq::{BrokerService, BrokerSettings};
use emberq_storage::StorageBackend;
use test_log::test;

use super::test_utilities::*;

#[test]
fn heartbeat_requires_registration() {
    let broker = memory_broker();
    let group = create_test_group("heartbeat");

    assert!(!broker.consumer_heartbeat(&group, "ch-1"));
    broker.register_consumer(&group, "ch-1", vec!["orders".to_string()]);
    assert!(broker.consumer_heartbeat(&group, "ch-1"));
    broker.shutdown();
}

#[test]
fn removing_a_channel_spans_every_group() {
    let broker = memory_broker();
    let group_a = create_test_group("span_a");
    let group_b = create_test_group("span_b");
    broker.register_consumer(&group_a, "ch-1", vec![]);
    broker.register_consumer(&group_b, "ch-1", vec![]);
    broker.register_consumer(&group_b, "ch-2", vec![]);

    broker.remove_consumer_channel("ch-1");

    let groups = broker.consumer_groups();
    assert!(!groups.is_active(&group_a, "ch-1"));
    assert!(!groups.is_active(&group_b, "ch-1"));
    assert!(groups.is_active(&group_b, "ch-2"));
    broker.shutdown();
}

#[test]
fn silent_channels_are_evicted_while_heartbeating_ones_survive() {
    let settings = BrokerSettings {
        consumer_timeout: Duration::from_millis(150),
        scan_stale_consumer_interval: Duration::from_millis(25),
        ..fast_settings()
    };
    let broker = BrokerService::new(settings, &StorageBackend::new_memory()).unwrap();
    broker.start().unwrap();

    let group = create_test_group("stale");
    broker.register_consumer(&group, "silent", vec![]);
    broker.register_consumer(&group, "chatty", vec![]);

    // Keep one channel alive past the other's timeout.
    for _ in 0..8 {
        std::thread::sleep(Duration::from_millis(50));
        broker.consumer_heartbeat(&group, "chatty");
    }

    let groups = broker.consumer_groups();
    assert!(!groups.is_active(&group, "silent"));
    assert!(groups.is_active(&group, "chatty"));
    broker.shutdown();
}
