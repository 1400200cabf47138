use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::event::{AgentData, Event, EventKind};
use crate::pubsub::PubSub;
use crate::utils::{now, seconds, DateTime, DateTimeExt};

const DEFAULT_OFFLINE_THRESHOLD: Duration = seconds(60);
const SWEEP_INTERVAL: Duration = seconds(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub agent_id: String,
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub peer_id: Option<String>,
    pub last_seen: DateTime,
    pub is_online: bool,
}

struct Inner {
    by_id: HashMap<String, AgentState>,
    by_peer: HashMap<String, HashSet<String>>,
    by_capability: HashMap<String, HashSet<String>>,
}

/// Connected MCP clients, indexed by agent id, peer id, and capability
/// (spec §4.10). Lifecycle notifications (`agent.joined`/`agent.left`) go
/// through the shared event bus rather than a mutex-protected callback
/// list, matching [`crate::registry::PeerRegistry`].
pub struct AgentRegistry {
    events: Arc<PubSub<Event>>,
    inner: RwLock<Inner>,
    offline_threshold: Duration,
}

impl AgentRegistry {
    pub fn new(events: Arc<PubSub<Event>>) -> Self {
        Self::with_offline_threshold(events, DEFAULT_OFFLINE_THRESHOLD)
    }

    pub fn with_offline_threshold(events: Arc<PubSub<Event>>, offline_threshold: Duration) -> Self {
        AgentRegistry {
            events,
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                by_peer: HashMap::new(),
                by_capability: HashMap::new(),
            }),
            offline_threshold,
        }
    }

    pub async fn connect(
        &self,
        agent_id: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
        capabilities: Vec<String>,
        peer_id: Option<String>,
    ) {
        let agent_id = agent_id.into();
        let name = name.into();
        let provider = provider.into();
        let state = AgentState {
            agent_id: agent_id.clone(),
            name: name.clone(),
            provider: provider.clone(),
            capabilities: capabilities.clone(),
            peer_id: peer_id.clone(),
            last_seen: now(),
            is_online: true,
        };

        {
            let mut inner = self.inner.write().await;
            if let Some(peer) = &peer_id {
                inner.by_peer.entry(peer.clone()).or_default().insert(agent_id.clone());
            }
            for cap in &capabilities {
                inner.by_capability.entry(cap.clone()).or_default().insert(agent_id.clone());
            }
            inner.by_id.insert(agent_id.clone(), state);
        }

        self.events.publish(Event::new(
            EventKind::AgentJoined,
            AgentData {
                agent_id,
                name,
                provider,
            },
        ));
    }

    pub async fn heartbeat(&self, agent_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.by_id.get_mut(agent_id) {
            Some(agent) => {
                agent.last_seen = now();
                agent.is_online = true;
                true
            }
            None => false,
        }
    }

    pub async fn disconnect(&self, agent_id: &str) {
        let removed = {
            let mut inner = self.inner.write().await;
            let removed = inner.by_id.remove(agent_id);
            if let Some(agent) = &removed {
                if let Some(peer) = &agent.peer_id {
                    if let Some(set) = inner.by_peer.get_mut(peer) {
                        set.remove(agent_id);
                    }
                }
                for cap in &agent.capabilities {
                    if let Some(set) = inner.by_capability.get_mut(cap) {
                        set.remove(agent_id);
                    }
                }
            }
            removed
        };
        if let Some(agent) = removed {
            self.events.publish(Event::new(
                EventKind::AgentLeft,
                AgentData {
                    agent_id: agent.agent_id,
                    name: agent.name,
                    provider: agent.provider,
                },
            ));
        }
    }

    pub async fn get(&self, agent_id: &str) -> Option<AgentState> {
        self.inner.read().await.by_id.get(agent_id).cloned()
    }

    pub async fn list(&self) -> Vec<AgentState> {
        self.inner.read().await.by_id.values().cloned().collect()
    }

    pub async fn list_by_peer(&self, peer_id: &str) -> Vec<AgentState> {
        let inner = self.inner.read().await;
        inner
            .by_peer
            .get(peer_id)
            .map(|ids| ids.iter().filter_map(|id| inner.by_id.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn list_by_capability(&self, capability: &str) -> Vec<AgentState> {
        let inner = self.inner.read().await;
        inner
            .by_capability
            .get(capability)
            .map(|ids| ids.iter().filter_map(|id| inner.by_id.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    /// Marks agents offline whose `last_seen` is older than 60s.
    pub async fn sweep(&self) -> usize {
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for agent in inner.by_id.values_mut() {
            if agent.is_online && agent.last_seen.elapsed() > self.offline_threshold {
                agent.is_online = false;
                changed += 1;
            }
        }
        changed
    }

    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => { registry.sweep().await; }
                }
            }
        })
    }
}
