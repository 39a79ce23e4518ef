//! Store-and-forward: queue ordering and the publisher drain.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use kiosk_gateway::config::{BrokerConfig, StoreConfig};
use kiosk_gateway::error::BrokerError;
use kiosk_gateway::publisher::{Publisher, Step};
use kiosk_gateway::queue::TelemetryQueue;
use kiosk_gateway::telemetry::Topic;

use crate::mock_hw::{MockBroker, VirtualClock};

fn publisher(queue: &TelemetryQueue, broker: &Arc<MockBroker>, budget: Duration) -> (Publisher, Arc<VirtualClock>) {
    let clock = VirtualClock::new(budget);
    let p = Publisher::new(
        queue.clone(),
        broker.clone(),
        clock.clone(),
        &BrokerConfig::default(),
        &StoreConfig::default(),
    );
    (p, clock)
}

#[test]
fn drains_oldest_first_on_mapped_topics() {
    let queue = TelemetryQueue::volatile().unwrap();
    queue.push(Topic::Status, "A").unwrap();
    queue.push(Topic::Gps, "B").unwrap();
    queue.push(Topic::Status, "C").unwrap();
    let broker = Arc::new(MockBroker::default());
    let (p, _clock) = publisher(&queue, &broker, Duration::from_secs(1));

    for _ in 0..3 {
        assert!(matches!(p.step(), Step::Sent(_)));
    }
    assert_eq!(p.step(), Step::Empty);
    assert_eq!(
        broker.published(),
        vec![
            ("gateway/bootup".to_string(), "A".to_string()),
            ("gateway/gps".to_string(), "B".to_string()),
            ("gateway/bootup".to_string(), "C".to_string()),
        ]
    );
    assert!(queue.is_empty().unwrap());
}

#[test]
fn refused_record_stays_at_the_head() {
    let queue = TelemetryQueue::volatile().unwrap();
    let first = queue.push(Topic::Status, "A").unwrap();
    queue.push(Topic::Status, "B").unwrap();
    let broker = Arc::new(MockBroker::default());
    let (p, _clock) = publisher(&queue, &broker, Duration::from_secs(1));

    broker.refuse_with(|| BrokerError::Backpressure);
    assert_eq!(p.step(), Step::Held(first));
    assert_eq!(p.step(), Step::Held(first));
    assert_eq!(queue.len().unwrap(), 2);

    broker.accept();
    assert_eq!(p.step(), Step::Sent(first));
    assert_eq!(queue.oldest().unwrap().unwrap().payload, "B");
}

#[test]
fn unconfirmed_record_is_kept_and_not_handed_off_twice() {
    let queue = TelemetryQueue::volatile().unwrap();
    let id = queue.push(Topic::Status, "A").unwrap();
    let broker = Arc::new(MockBroker::default());
    broker.withhold_acks(true);
    let (p, _clock) = publisher(&queue, &broker, Duration::from_secs(1));

    assert_eq!(p.step(), Step::Held(id));
    assert_eq!(p.step(), Step::Held(id));
    assert_eq!(broker.published().len(), 1);
    assert_eq!(queue.len().unwrap(), 1);

    broker.withhold_acks(false);
    assert_eq!(p.step(), Step::Sent(id));
    assert_eq!(broker.published().len(), 1);
    assert!(queue.is_empty().unwrap());
}

#[test]
fn record_handed_off_without_completion_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mqttmsg.db");
    {
        let queue = TelemetryQueue::open(&path).unwrap();
        queue.push(Topic::Gps, "in flight").unwrap();
        let broker = Arc::new(MockBroker::default());
        broker.withhold_acks(true);
        let (p, _clock) = publisher(&queue, &broker, Duration::from_secs(1));
        assert!(matches!(p.step(), Step::Held(_)));
        assert_eq!(broker.published().len(), 1);
    }

    let queue = TelemetryQueue::open(&path).unwrap();
    assert_eq!(queue.len().unwrap(), 1);
    let broker = Arc::new(MockBroker::default());
    let (p, _clock) = publisher(&queue, &broker, Duration::from_secs(1));
    assert!(matches!(p.step(), Step::Sent(_)));
    assert_eq!(
        broker.published(),
        vec![("gateway/gps".to_string(), "in flight".to_string())]
    );
}

#[test]
fn run_drains_everything_then_idles_until_shutdown() {
    let queue = TelemetryQueue::volatile().unwrap();
    for payload in ["1", "2", "3", "4"] {
        queue.push(Topic::Gps, payload).unwrap();
    }
    let broker = Arc::new(MockBroker::default());
    let (p, clock) = publisher(&queue, &broker, Duration::from_secs(400));

    p.run();

    let payloads: Vec<String> = broker.published().into_iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, vec!["1", "2", "3", "4"]);
    // Three idle polls of 150 s exhaust the 400 s budget.
    assert_eq!(clock.elapsed(), Duration::from_secs(450));
}

#[test]
fn disconnected_client_backs_off_without_losing_records() {
    let queue = TelemetryQueue::volatile().unwrap();
    queue.push(Topic::Status, "kept").unwrap();
    let broker = Arc::new(MockBroker::default());
    broker.refuse_with(|| BrokerError::Disconnected);
    let (p, clock) = publisher(&queue, &broker, Duration::from_secs(20));

    p.run();

    assert!(broker.published().is_empty());
    assert_eq!(queue.len().unwrap(), 1);
    // 5 s reconnect backoff per attempt.
    assert_eq!(clock.elapsed(), Duration::from_secs(25));
}

#[derive(Debug, Clone)]
enum Op {
    Append(bool, u8),
    Drain,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<bool>(), any::<u8>()).prop_map(|(gps, n)| Op::Append(gps, n)),
        Just(Op::Drain),
    ]
}

proptest! {
    #[test]
    fn queue_matches_a_fifo_model(ops in proptest::collection::vec(op(), 1..60)) {
        let queue = TelemetryQueue::volatile().unwrap();
        let mut model: VecDeque<(Topic, String)> = VecDeque::new();

        for op in ops {
            match op {
                Op::Append(gps, n) => {
                    let topic = if gps { Topic::Gps } else { Topic::Status };
                    let payload = n.to_string();
                    queue.push(topic, &payload).unwrap();
                    model.push_back((topic, payload));
                }
                Op::Drain => {
                    let head = queue.oldest().unwrap();
                    let expected = model.pop_front();
                    prop_assert_eq!(head.as_ref().map(|r| (r.topic, r.payload.clone())), expected);
                    if let Some(r) = head {
                        prop_assert!(queue.remove(r.id).unwrap());
                    }
                }
            }
        }
        prop_assert_eq!(queue.len().unwrap(), model.len() as u64);
    }
}

#[test]
fn backlog_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mqttmsg.db");
    {
        let queue = TelemetryQueue::open(&path).unwrap();
        queue.push(Topic::Status, "before").unwrap();
        queue.push(Topic::Gps, "crash").unwrap();
    }

    let queue = TelemetryQueue::open(&path).unwrap();
    let broker = Arc::new(MockBroker::default());
    let (p, _clock) = publisher(&queue, &broker, Duration::from_secs(1));
    assert!(matches!(p.step(), Step::Sent(_)));
    assert!(matches!(p.step(), Step::Sent(_)));
    let payloads: Vec<String> = broker.published().into_iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, vec!["before", "crash"]);
}
