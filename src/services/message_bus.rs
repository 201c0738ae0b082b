//! Per-cluster message bus and ledger.
//!
//! Append-only, topic-indexed, totally ordered within a cluster. Sequence
//! numbers are assigned under the bus lock and are gap-free. Subscriber
//! callbacks run synchronously, in subscription order, after the append —
//! the lock is released first so a callback may itself publish.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::models::message::{BusMessage, MessageQuery};

/// Opaque handle returned by [`MessageBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous subscriber callback. Must not block; agents use it to wake
/// their own task, the supervisor to feed its shutdown detector.
pub type SubscriberCallback = Arc<dyn Fn(&BusMessage) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    /// `None` subscribes to every topic.
    topic_filter: Option<String>,
    callback: SubscriberCallback,
}

struct BusInner {
    log: Vec<Arc<BusMessage>>,
    /// topic → indices into `log`.
    topic_index: HashMap<String, Vec<usize>>,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
}

/// The ledger for one cluster.
pub struct MessageBus {
    cluster_id: String,
    inner: Mutex<BusInner>,
    /// Optional JSONL mirror, observability only.
    mirror: Option<Mutex<std::fs::File>>,
}

impl MessageBus {
    /// Create the bus for a cluster, optionally mirroring to
    /// `<mirror_dir>/<cluster_id>.jsonl`.
    pub fn new(cluster_id: impl Into<String>, mirror_dir: Option<&PathBuf>) -> Self {
        let cluster_id = cluster_id.into();
        let mirror = mirror_dir.and_then(|dir| {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(error = %e, dir = %dir.display(), "Failed to create bus mirror directory");
                return None;
            }
            let path = dir.join(format!("{cluster_id}.jsonl"));
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(Mutex::new(file)),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Failed to open bus mirror file");
                    None
                }
            }
        });

        Self {
            cluster_id,
            inner: Mutex::new(BusInner {
                log: Vec::new(),
                topic_index: HashMap::new(),
                subscribers: Vec::new(),
                next_subscription: 0,
            }),
            mirror,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Append a message and deliver it to matching subscribers.
    ///
    /// Returns the assigned sequence number. Callbacks complete before this
    /// returns; a callback that publishes recursively is appended after the
    /// current message, preserving total order.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        publisher: impl Into<String>,
        payload: Value,
    ) -> u64 {
        let topic = topic.into();
        let (message, subscribers) = {
            let mut inner = self.inner.lock().expect("bus lock poisoned");
            let sequence = inner.log.len() as u64 + 1;
            let message = Arc::new(BusMessage {
                sequence,
                cluster_id: self.cluster_id.clone(),
                topic: topic.clone(),
                publisher: publisher.into(),
                payload,
                timestamp: Utc::now(),
            });
            let index = inner.log.len();
            inner.log.push(Arc::clone(&message));
            inner.topic_index.entry(topic).or_default().push(index);

            let subscribers: Vec<(SubscriptionId, SubscriberCallback)> = inner
                .subscribers
                .iter()
                .filter(|s| {
                    s.topic_filter
                        .as_ref()
                        .is_none_or(|filter| *filter == message.topic)
                })
                .map(|s| (s.id, Arc::clone(&s.callback)))
                .collect();
            (message, subscribers)
        };

        self.mirror_append(&message);

        debug!(
            cluster_id = %self.cluster_id,
            sequence = message.sequence,
            topic = %message.topic,
            publisher = %message.publisher,
            "Message published"
        );

        for (_, callback) in subscribers {
            callback(&message);
        }

        message.sequence
    }

    /// All messages matching the filter, in sequence order.
    pub fn query(&self, query: &MessageQuery) -> Vec<Arc<BusMessage>> {
        let inner = self.inner.lock().expect("bus lock poisoned");

        // Topic-indexed fast path when only the topic narrows the scan.
        if let Some(ref topic) = query.topic {
            if let Some(indices) = inner.topic_index.get(topic) {
                return indices
                    .iter()
                    .map(|&i| Arc::clone(&inner.log[i]))
                    .filter(|m| query.matches(m))
                    .collect();
            }
            return Vec::new();
        }

        inner
            .log
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect()
    }

    /// Number of messages on the ledger.
    pub fn len(&self) -> u64 {
        self.inner.lock().expect("bus lock poisoned").log.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a callback for every future message matching `topic_filter`
    /// (`None` = all topics). Delivery order follows subscription order.
    pub fn subscribe(
        &self,
        topic_filter: Option<String>,
        callback: SubscriberCallback,
    ) -> SubscriptionId {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        inner.subscribers.push(Subscriber {
            id,
            topic_filter,
            callback,
        });
        id
    }

    /// Remove a subscription; unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        inner.subscribers.retain(|s| s.id != id);
    }

    fn mirror_append(&self, message: &BusMessage) {
        if let Some(ref mirror) = self.mirror {
            if let Ok(line) = serde_json::to_string(message) {
                let mut file = mirror.lock().expect("mirror lock poisoned");
                if let Err(e) = writeln!(file, "{line}") {
                    warn!(error = %e, "Failed to append to bus mirror");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_sequences_are_gap_free_from_one() {
        let bus = MessageBus::new("c1", None);

        assert_eq!(bus.publish("A", "orchestrator", json!({})), 1);
        assert_eq!(bus.publish("B", "orchestrator", json!({})), 2);
        assert_eq!(bus.publish("A", "worker", json!({})), 3);

        let all = bus.query(&MessageQuery::default());
        let sequences: Vec<u64> = all.iter().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn test_topic_query_returns_matching_subsequence() {
        let bus = MessageBus::new("c1", None);
        bus.publish("A", "x", json!({"n": 1}));
        bus.publish("B", "x", json!({"n": 2}));
        bus.publish("A", "y", json!({"n": 3}));

        let a_only = bus.query(&MessageQuery::topic("A"));
        assert_eq!(a_only.len(), 2);
        assert_eq!(a_only[0].sequence, 1);
        assert_eq!(a_only[1].sequence, 3);

        let missing = bus.query(&MessageQuery::topic("C"));
        assert!(missing.is_empty());
    }

    #[test]
    fn test_since_and_publisher_filters() {
        let bus = MessageBus::new("c1", None);
        bus.publish("A", "x", json!({}));
        bus.publish("A", "y", json!({}));
        bus.publish("A", "x", json!({}));

        let since = bus.query(&MessageQuery::since(1));
        assert_eq!(since.len(), 2);

        let from_x = bus.query(&MessageQuery {
            publisher: Some("x".to_string()),
            ..MessageQuery::default()
        });
        assert_eq!(from_x.len(), 2);
    }

    #[test]
    fn test_subscribers_run_before_publish_returns() {
        let bus = MessageBus::new("c1", None);
        let seen = Arc::new(AtomicU64::new(0));

        let seen_cb = Arc::clone(&seen);
        bus.subscribe(
            None,
            Arc::new(move |m| {
                seen_cb.store(m.sequence, Ordering::SeqCst);
            }),
        );

        let seq = bus.publish("A", "x", json!({}));
        assert_eq!(seen.load(Ordering::SeqCst), seq);
    }

    #[test]
    fn test_topic_filtered_subscription() {
        let bus = MessageBus::new("c1", None);
        let hits = Arc::new(AtomicU64::new(0));

        let hits_cb = Arc::clone(&hits);
        let id = bus.subscribe(
            Some("STOP".to_string()),
            Arc::new(move |_| {
                hits_cb.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish("OTHER", "x", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.publish("STOP", "x", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.unsubscribe(id);
        bus.publish("STOP", "x", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_publish_recursively() {
        let bus = Arc::new(MessageBus::new("c1", None));

        let bus_cb = Arc::clone(&bus);
        bus.subscribe(
            Some("PING".to_string()),
            Arc::new(move |_| {
                bus_cb.publish("PONG", "responder", json!({}));
            }),
        );

        bus.publish("PING", "x", json!({}));

        let all = bus.query(&MessageQuery::default());
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].topic, "PING");
        assert_eq!(all[1].topic, "PONG");
        assert_eq!(all[1].sequence, 2);
    }

    #[test]
    fn test_mirror_writes_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let mirror_dir = dir.path().to_path_buf();
        let bus = MessageBus::new("c9", Some(&mirror_dir));

        bus.publish("A", "x", json!({"k": "v"}));
        bus.publish("B", "y", json!({}));

        let content = std::fs::read_to_string(mirror_dir.join("c9.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: BusMessage = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.topic, "A");
        assert_eq!(first.sequence, 1);
    }
}
