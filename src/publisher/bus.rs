//! In-process topic bus carrying the sync contract
//!
//! Retained topics keep their last payload so late subscribers (the
//! WebSocket replay, `GET /api/topics/...`) see current truth. Every publish
//! is also broadcast to live subscribers.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::Result;

const BUS_CAPACITY: usize = 512;

/// One message on the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Full topic including the device namespace
    pub topic: String,
    /// Serialized JSON payload
    pub payload: String,
    pub retained: bool,
}

/// Wire frame for WebSocket subscribers
#[derive(Debug, Serialize)]
pub struct BusFrame<'a> {
    pub topic: &'a str,
    pub payload: serde_json::Value,
    pub retained: bool,
}

impl BusMessage {
    /// Render as a `{topic, payload, retained}` frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be serialized
    pub fn to_frame(&self) -> Result<String> {
        let payload = serde_json::from_str(&self.payload)
            .unwrap_or_else(|_| serde_json::Value::String(self.payload.clone()));
        Ok(serde_json::to_string(&BusFrame {
            topic: &self.topic,
            payload,
            retained: self.retained,
        })?)
    }
}

/// Namespaced publish/subscribe bus with retained topics
pub struct SyncBus {
    namespace: String,
    retained: RwLock<BTreeMap<String, String>>,
    tx: broadcast::Sender<BusMessage>,
}

impl SyncBus {
    #[must_use]
    pub fn new(namespace: &str) -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            namespace: namespace.trim_matches('/').to_string(),
            retained: RwLock::new(BTreeMap::new()),
            tx,
        }
    }

    /// Full topic for an assistant-relative suffix (`schedules/state`)
    #[must_use]
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/assistant/{suffix}", self.namespace)
    }

    /// Publish a raw payload under an assistant-relative topic
    pub fn publish(&self, suffix: &str, payload: String, retain: bool) {
        let topic = self.topic(suffix);
        if retain {
            self.retained
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(topic.clone(), payload.clone());
        }
        tracing::trace!(topic = %topic, retain, "bus publish");

        // No live subscribers is fine; retained state still updated
        let _ = self.tx.send(BusMessage {
            topic,
            payload,
            retained: retain,
        });
    }

    /// Serialize and publish a value
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized
    pub fn publish_json<T: Serialize + ?Sized>(&self, suffix: &str, value: &T, retain: bool) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        self.publish(suffix, payload, retain);
        Ok(())
    }

    /// Retained payload of a full topic
    #[must_use]
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.retained
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    /// Every retained topic, for replay to a new subscriber
    #[must_use]
    pub fn retained_all(&self) -> Vec<BusMessage> {
        self.retained
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(topic, payload)| BusMessage {
                topic: topic.clone(),
                payload: payload.clone(),
                retained: true,
            })
            .collect()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_are_namespaced() {
        let bus = SyncBus::new("kitchen/");
        assert_eq!(bus.topic("schedules/state"), "kitchen/assistant/schedules/state");
    }

    #[tokio::test]
    async fn test_retained_and_live() {
        let bus = SyncBus::new("kitchen");
        let mut rx = bus.subscribe();

        bus.publish("schedules/state", "{\"alarms\":[]}".to_string(), true);
        bus.publish("timers/active", "{\"state\":\"idle\"}".to_string(), false);

        assert_eq!(
            bus.retained("kitchen/assistant/schedules/state").as_deref(),
            Some("{\"alarms\":[]}")
        );
        assert!(bus.retained("kitchen/assistant/timers/active").is_none());
        assert_eq!(bus.retained_all().len(), 1);

        assert!(rx.recv().await.unwrap().retained);
        assert!(!rx.recv().await.unwrap().retained);
    }

    #[test]
    fn test_frame_embeds_json_payload() {
        let message = BusMessage {
            topic: "h/assistant/state".to_string(),
            payload: "{\"state\":\"idle\"}".to_string(),
            retained: false,
        };
        let frame: serde_json::Value = serde_json::from_str(&message.to_frame().unwrap()).unwrap();
        assert_eq!(frame["payload"]["state"], "idle");
    }
}
