//! The `broadcast(topic, bytes)` / `subscribe(topic)` contract the core
//! requires from the (externally supplied) P2P mesh (spec §6.1). Only the
//! interface is specified; the gossip/DHT/NAT-traversal implementation is
//! out of scope. [`LoopbackTransport`] is an in-process stand-in used by
//! tests and single-node runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::pubsub::PubSub;

pub const TOPIC_CONTEXT: &str = "context";
pub const TOPIC_LOCK: &str = "lock";
pub const TOPIC_VIBE: &str = "vibe";
pub const TOPIC_HUMAN: &str = "human";

#[async_trait]
pub trait TopicStream: Send {
    /// Returns `None` once the transport has closed the subscription.
    async fn recv(&mut self) -> Option<(String, Vec<u8>)>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Best-effort fan-out to all peers subscribed to `topic`.
    async fn broadcast(&self, topic: &str, bytes: Vec<u8>);
    async fn subscribe(&self, topic: &str) -> Box<dyn TopicStream>;
}

struct PubSubTopicStream {
    receiver: crate::pubsub::Receiver<(String, Vec<u8>)>,
}

#[async_trait]
impl TopicStream for PubSubTopicStream {
    async fn recv(&mut self) -> Option<(String, Vec<u8>)> {
        self.receiver.recv().await.ok()
    }
}

/// Single-process loopback: `broadcast` on a topic publishes to every
/// local `subscribe`r of that topic. Useful for tests and for running
/// several in-process components without a real mesh.
pub struct LoopbackTransport {
    node_id: String,
    topics: RwLock<HashMap<String, PubSub<(String, Vec<u8>)>>>,
}

impl LoopbackTransport {
    pub fn new(node_id: impl Into<String>) -> Arc<Self> {
        Arc::new(LoopbackTransport {
            node_id: node_id.into(),
            topics: RwLock::new(HashMap::new()),
        })
    }

    async fn topic(&self, topic: &str) -> PubSub<(String, Vec<u8>)> {
        if let Some(existing) = self.topics.read().await.get(topic) {
            return existing.clone();
        }
        let mut topics = self.topics.write().await;
        topics.entry(topic.to_string()).or_insert_with(|| PubSub::new(256)).clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn broadcast(&self, topic: &str, bytes: Vec<u8>) {
        let bus = self.topic(topic).await;
        bus.publish((self.node_id.clone(), bytes));
    }

    async fn subscribe(&self, topic: &str) -> Box<dyn TopicStream> {
        let bus = self.topic(topic).await;
        Box::new(PubSubTopicStream { receiver: bus.subscribe() })
    }
}
