//! Queue drain loop.
//!
//! Takes the oldest queued record, hands it to the broker client and
//! removes it only once the broker has completed the QoS 2 flow.  One record
//! is in flight at a time; while it is unconfirmed it stays at the head of
//! the queue and is not handed off again.  Delivery is at-least-once: a
//! crash or restart before the completion republishes that record.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::app::ports::{Broker, Clock};
use crate::config::{BrokerConfig, StoreConfig};
use crate::queue::TelemetryQueue;
use crate::telemetry::Topic;

/// Outcome of one drain step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Record `id` was confirmed by the broker and removed.
    Sent(i64),
    /// Nothing queued.
    Empty,
    /// The client refused the record or the broker has not confirmed it
    /// yet; it stays at the head of the queue.
    Held(i64),
    /// The store itself failed.
    StoreFault,
}

pub struct Publisher {
    queue: TelemetryQueue,
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    topic_boot_up: String,
    topic_gps: String,
    idle: Duration,
    retry: Duration,
    ack_timeout: Duration,
    /// Id of the record handed off but not yet confirmed.
    in_flight: Mutex<Option<i64>>,
}

impl Publisher {
    pub fn new(
        queue: TelemetryQueue,
        broker: Arc<dyn Broker>,
        clock: Arc<dyn Clock>,
        broker_config: &BrokerConfig,
        store_config: &StoreConfig,
    ) -> Self {
        Self {
            queue,
            broker,
            clock,
            topic_boot_up: broker_config.topic_boot_up.clone(),
            topic_gps: broker_config.topic_gps.clone(),
            idle: Duration::from_secs(store_config.idle_poll_secs),
            retry: Duration::from_secs(broker_config.reconnect_backoff_secs),
            ack_timeout: Duration::from_secs(broker_config.ack_timeout_secs),
            in_flight: Mutex::new(None),
        }
    }

    /// Broker topic for a queue topic.
    pub fn broker_topic(&self, topic: Topic) -> &str {
        match topic {
            Topic::Status => &self.topic_boot_up,
            Topic::Gps => &self.topic_gps,
        }
    }

    pub fn step(&self) -> Step {
        let record = match self.queue.oldest() {
            Ok(Some(record)) => record,
            Ok(None) => return Step::Empty,
            Err(e) => {
                error!(target: "publisher", "queue read failed: {e}");
                return Step::StoreFault;
            }
        };

        let mut in_flight = self.in_flight.lock();
        if *in_flight != Some(record.id) {
            let topic = self.broker_topic(record.topic);
            if let Err(e) = self.broker.publish(topic, record.payload.as_bytes()) {
                warn!(target: "publisher", "#{} held: {e}", record.id);
                return Step::Held(record.id);
            }
            *in_flight = Some(record.id);
            debug!(target: "publisher", "#{} -> {topic}", record.id);
        }

        if let Err(e) = self.broker.confirm(self.ack_timeout) {
            warn!(target: "publisher", "#{} held: {e}", record.id);
            return Step::Held(record.id);
        }
        *in_flight = None;

        match self.queue.remove(record.id) {
            Ok(true) => {}
            Ok(false) => warn!(target: "publisher", "#{} was already gone", record.id),
            Err(e) => {
                error!(target: "publisher", "could not remove #{}: {e}", record.id);
                return Step::StoreFault;
            }
        }
        Step::Sent(record.id)
    }

    /// Drain until the clock reports shutdown.
    pub fn run(&self) {
        while self.clock.is_running() {
            let wait = match self.step() {
                Step::Sent(_) => continue,
                Step::Empty => self.idle,
                Step::Held(_) | Step::StoreFault => self.retry,
            };
            if !self.clock.pause(wait) {
                break;
            }
        }
        debug!(target: "publisher", "stopped");
    }
}
