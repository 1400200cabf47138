use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventKind, PeerData};
use crate::pubsub::PubSub;
use crate::utils::{now, seconds, DateTime, DateTimeExt};
use crate::vector_clock::ClockSnapshot;

const DEFAULT_OFFLINE_THRESHOLD: Duration = seconds(30);
const SWEEP_INTERVAL: Duration = seconds(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerState {
    pub id: String,
    pub name: String,
    pub vector_clock: ClockSnapshot,
    pub last_seen: DateTime,
    pub is_online: bool,
}

/// Who's online, maintained by the Sync Manager as deltas and heartbeats
/// arrive (spec §3.7, §4.7, §4.10). Connect/disconnect notifications go
/// through the shared event bus (`peer.connected`/`peer.disconnected`)
/// rather than a separate mutex-protected callback list, per spec §9's
/// re-architecture note.
pub struct PeerRegistry {
    events: Arc<PubSub<Event>>,
    peers: RwLock<HashMap<String, PeerState>>,
    offline_threshold: Duration,
}

impl PeerRegistry {
    pub fn new(events: Arc<PubSub<Event>>) -> Self {
        Self::with_offline_threshold(events, DEFAULT_OFFLINE_THRESHOLD)
    }

    pub fn with_offline_threshold(events: Arc<PubSub<Event>>, offline_threshold: Duration) -> Self {
        PeerRegistry {
            events,
            peers: RwLock::new(HashMap::new()),
            offline_threshold,
        }
    }

    /// Records activity from a peer, bringing it online if it wasn't.
    pub async fn observe(&self, id: impl Into<String>, name: impl Into<String>, vector_clock: ClockSnapshot) {
        let id = id.into();
        let became_online;
        {
            let mut peers = self.peers.write().await;
            let was_online = peers.get(&id).map(|p| p.is_online).unwrap_or(false);
            let entry = peers.entry(id.clone()).or_insert_with(|| PeerState {
                id: id.clone(),
                name: name.into(),
                vector_clock: vector_clock.clone(),
                last_seen: now(),
                is_online: true,
            });
            entry.vector_clock = vector_clock;
            entry.last_seen = now();
            entry.is_online = true;
            became_online = !was_online;
        }
        if became_online {
            self.events.publish(Event::new(
                EventKind::PeerConnected,
                PeerData {
                    peer_id: id,
                    addr: None,
                },
            ));
        }
    }

    pub async fn get(&self, id: &str) -> Option<PeerState> {
        self.peers.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<PeerState> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Marks peers offline whose `last_seen` is older than 30s, publishing
    /// `peer.disconnected` for each transition.
    pub async fn sweep(&self) -> usize {
        let went_offline: Vec<String> = {
            let mut peers = self.peers.write().await;
            let mut went_offline = Vec::new();
            for peer in peers.values_mut() {
                if peer.is_online && peer.last_seen.elapsed() > self.offline_threshold {
                    peer.is_online = false;
                    went_offline.push(peer.id.clone());
                }
            }
            went_offline
        };
        for id in &went_offline {
            self.events.publish(Event::new(
                EventKind::PeerDisconnected,
                PeerData {
                    peer_id: id.clone(),
                    addr: None,
                },
            ));
        }
        went_offline.len()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn observing_a_new_peer_publishes_connected() {
        let events = Arc::new(PubSub::new(16));
        let mut sub = events.subscribe();
        let registry = PeerRegistry::new(events);

        registry.observe("n2", "n2", ClockSnapshot::new()).await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, "peer.connected");
    }

    #[tokio::test]
    async fn sweep_marks_stale_peers_offline() {
        let events = Arc::new(PubSub::new(16));
        let registry = PeerRegistry::new(events);
        registry.observe("n2", "n2", ClockSnapshot::new()).await;
        {
            let mut peers = registry.peers.write().await;
            peers.get_mut("n2").unwrap().last_seen = now() - chrono::Duration::seconds(60);
        }
        let changed = registry.sweep().await;
        assert_eq!(changed, 1);
        assert!(!registry.get("n2").await.unwrap().is_online);
    }
}
