//! Publish/subscribe seam for catalog notifications and interpretation events.
//!
//! `EventBus` is the transport boundary. `InMemoryEventBus` is the in-process
//! implementation: one `tokio::sync::broadcast` channel per topic.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub const TOPIC_CATALOG_UPDATED: &str = "lab.catalog.updated.v1";
pub const TOPIC_CATALOG_MISS: &str = "lab.catalog.miss.v1";
pub const TOPIC_LABS_INTERPRETED: &str = "lab.interpreted.v1";

const CHANNEL_CAPACITY: usize = 256;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("Event transport unavailable: {0}")]
    TransportUnavailable(String),
}

/// One message as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Value,
}

pub trait EventBus: Send + Sync {
    /// Publishing with no subscribers succeeds.
    fn publish(&self, topic: &str, key: Option<&str>, payload: &Value) -> Result<(), BusError>;

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope>;
}

#[derive(Default)]
pub struct InMemoryEventBus {
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, topic: &str, key: Option<&str>, payload: &Value) -> Result<(), BusError> {
        let channels = self
            .channels
            .lock()
            .map_err(|_| BusError::TransportUnavailable("channel registry poisoned".into()))?;
        if let Some(sender) = channels.get(topic) {
            let delivered = sender
                .send(Envelope {
                    topic: topic.to_string(),
                    key: key.map(str::to_string),
                    payload: payload.clone(),
                })
                .unwrap_or(0);
            tracing::trace!(topic, delivered, "Event published");
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Envelope> {
        match self.channels.lock() {
            Ok(mut channels) => channels
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe(),
            // A poisoned registry still hands out a receiver; it just never fires.
            Err(_) => broadcast::channel(1).1,
        }
    }
}

/// Publish with exponential backoff on `TransportUnavailable`.
/// `attempts` of zero is treated as one.
pub async fn publish_with_retry(
    bus: &dyn EventBus,
    topic: &str,
    key: Option<&str>,
    payload: &Value,
    attempts: u32,
) -> Result<(), BusError> {
    publish_with_backoff(bus, topic, key, payload, attempts, RETRY_BASE_DELAY).await
}

pub(crate) async fn publish_with_backoff(
    bus: &dyn EventBus,
    topic: &str,
    key: Option<&str>,
    payload: &Value,
    attempts: u32,
    base_delay: Duration,
) -> Result<(), BusError> {
    let attempts = attempts.max(1);
    let mut delay = base_delay;
    let mut attempt = 1;
    loop {
        match bus.publish(topic, key, payload) {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= attempts => {
                tracing::error!(topic, attempts, error = %e, "Publish failed, giving up");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(topic, attempt, error = %e, "Publish failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn subscribers_receive_their_topic_only() {
        let bus = InMemoryEventBus::new();
        let mut misses = bus.subscribe(TOPIC_CATALOG_MISS);
        let mut interpreted = bus.subscribe(TOPIC_LABS_INTERPRETED);

        bus.publish(TOPIC_CATALOG_MISS, None, &json!({ "code": "x" })).unwrap();
        bus.publish(TOPIC_LABS_INTERPRETED, Some("evt-1"), &json!({})).unwrap();

        let miss = misses.recv().await.unwrap();
        assert_eq!(miss.payload["code"], "x");
        assert!(misses.try_recv().is_err());

        let event = interpreted.recv().await.unwrap();
        assert_eq!(event.key.as_deref(), Some("evt-1"));
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = InMemoryEventBus::new();
        assert!(bus.publish(TOPIC_CATALOG_MISS, None, &json!({})).is_ok());
    }

    struct FlakyBus {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl EventBus for FlakyBus {
        fn publish(&self, _: &str, _: Option<&str>, _: &Value) -> Result<(), BusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(BusError::TransportUnavailable("down".into()));
            }
            Ok(())
        }

        fn subscribe(&self, _: &str) -> broadcast::Receiver<Envelope> {
            broadcast::channel(1).1
        }
    }

    fn flaky(failures: u32) -> FlakyBus {
        FlakyBus {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failure() {
        let bus = flaky(2);
        let result =
            publish_with_backoff(&bus, "t", None, &json!({}), 3, Duration::from_millis(1)).await;
        assert!(result.is_ok());
        assert_eq!(bus.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let bus = flaky(10);
        let result =
            publish_with_backoff(&bus, "t", None, &json!({}), 2, Duration::from_millis(1)).await;
        assert!(matches!(result, Err(BusError::TransportUnavailable(_))));
        assert_eq!(bus.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let bus = flaky(0);
        publish_with_backoff(&bus, "t", None, &json!({}), 0, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(bus.calls.load(Ordering::SeqCst), 1);
    }
}
