use std::sync::Arc;

use async_trait::async_trait;

use crate::delta::{Delta, DeltaLog, DeltaPayload, FileChangePayload};
use crate::errors::{CoreError, CoreResult};
use crate::event::{ContextData, Event, EventKind};
use crate::pubsub::PubSub;
use crate::registry::PeerRegistry;
use crate::transport::{Transport, TOPIC_CONTEXT};
use crate::utils::now;
use crate::vector_clock::{compare_maps, CausalOrder, ClockSnapshot, VectorClock};
use crate::wire::WireMessage;

/// A concurrent modification detected while ingesting a remote delta
/// (spec §4.7 step 2). Delivered to a [`ConflictHandler`] supplied at
/// construction rather than dispatched through mutex-protected callback
/// slices (spec §9 re-architecture note).
#[derive(Debug, Clone)]
pub struct FileConflict {
    pub file_path: String,
    pub local_delta: Delta,
    pub remote_delta: Delta,
    pub detected_at: crate::utils::DateTime,
}

#[async_trait]
pub trait ConflictHandler: Send + Sync {
    async fn on_conflict(&self, conflict: FileConflict);
}

/// Logs and otherwise ignores conflicts; used where nothing else wires a
/// handler in (e.g. tests, single-agent setups).
pub struct LoggingConflictHandler;

#[async_trait]
impl ConflictHandler for LoggingConflictHandler {
    async fn on_conflict(&self, conflict: FileConflict) {
        log::warn!(
            "concurrent modification of {}: local={} remote={}",
            conflict.file_path,
            conflict.local_delta.id,
            conflict.remote_delta.id
        );
    }
}

const RECENT_SCAN_WINDOW: usize = 200;

/// Connects file-watcher events to local deltas, ingests remote deltas,
/// merges clocks, and detects concurrent file modifications (spec §4.7).
pub struct SyncManager {
    node_id: String,
    node_name: String,
    clock: Arc<VectorClock>,
    log: Arc<DeltaLog>,
    peers: Arc<PeerRegistry>,
    transport: Arc<dyn Transport>,
    events: Arc<PubSub<Event>>,
    conflict_handler: Arc<dyn ConflictHandler>,
}

impl SyncManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        node_name: impl Into<String>,
        clock: Arc<VectorClock>,
        log: Arc<DeltaLog>,
        peers: Arc<PeerRegistry>,
        transport: Arc<dyn Transport>,
        events: Arc<PubSub<Event>>,
        conflict_handler: Arc<dyn ConflictHandler>,
    ) -> Arc<Self> {
        Arc::new(SyncManager {
            node_id: node_id.into(),
            node_name: node_name.into(),
            clock,
            log,
            peers,
            transport,
            events,
            conflict_handler,
        })
    }

    pub fn clock(&self) -> &Arc<VectorClock> {
        &self.clock
    }

    pub fn log(&self) -> &Arc<DeltaLog> {
        &self.log
    }

    async fn broadcast_delta(&self, delta: &Delta) {
        let message = WireMessage::Delta { delta: delta.clone() };
        match message.to_bytes() {
            Ok(bytes) => self.transport.broadcast(TOPIC_CONTEXT, bytes).await,
            Err(err) => log::warn!("failed to encode delta: {err}"),
        }
    }

    /// Local path (spec §4.7): a file-watcher event becomes a delta,
    /// stamped with our own incremented clock, appended and broadcast.
    pub async fn handle_file_change(&self, payload: FileChangePayload) -> Delta {
        self.clock.increment(&self.node_id);
        let snapshot = self.clock.snapshot();
        let file_path = payload.file_path.clone();
        let delta = Delta::new(
            self.node_id.clone(),
            self.node_name.clone(),
            snapshot,
            DeltaPayload::FileChange(payload),
        );
        self.log.append(delta.clone()).await;
        self.broadcast_delta(&delta).await;
        self.events.publish(Event::new(
            EventKind::ContextUpdated,
            ContextData {
                file_path,
                agent_id: Some(self.node_id.clone()),
                content: None,
            },
        ));
        delta
    }

    /// Remote path (spec §4.7): idempotent ingest, concurrent-edit
    /// detection, clock merge, then append. Returns `false` if the delta
    /// was already known.
    pub async fn handle_remote_delta(&self, delta: Delta) -> bool {
        if self.log.get(&delta.id).await.is_some() {
            return false;
        }

        if let Some(file_path) = delta.file_path() {
            let recent = self.log.get_recent(RECENT_SCAN_WINDOW).await;
            for local in recent.iter().filter(|d| d.source_id != delta.source_id && d.file_path() == Some(file_path)) {
                if compare_maps(&local.vector_clock, &delta.vector_clock) == CausalOrder::Concurrent {
                    self.conflict_handler
                        .on_conflict(FileConflict {
                            file_path: file_path.to_string(),
                            local_delta: local.clone(),
                            remote_delta: delta.clone(),
                            detected_at: now(),
                        })
                        .await;
                    break;
                }
            }
        }

        self.clock.merge_snapshot(&delta.vector_clock);
        self.clock.increment(&self.node_id);

        self.peers.observe(delta.source_id.clone(), delta.source_name.clone(), delta.vector_clock.clone()).await;
        self.log.append(delta.clone()).await;
        true
    }

    /// Emits one `agent_status(online)` delta; called by the heartbeat
    /// task every 10s (spec §4.7).
    pub async fn emit_heartbeat(&self) {
        self.clock.increment(&self.node_id);
        let snapshot = self.clock.snapshot();
        let delta = Delta::new(
            self.node_id.clone(),
            self.node_name.clone(),
            snapshot,
            DeltaPayload::AgentStatus(crate::delta::AgentStatusPayload {
                agent_id: self.node_id.clone(),
                state: "online".to_string(),
            }),
        );
        self.log.append(delta.clone()).await;
        self.broadcast_delta(&delta).await;
    }

    pub fn spawn_heartbeat(self: &Arc<Self>, cancel: tokio_util::sync::CancellationToken) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(crate::utils::seconds(10));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => { manager.emit_heartbeat().await; }
                }
            }
        })
    }

    /// Builds a `sync_request` against what we last saw of `peer_id`.
    pub async fn request_sync(&self, peer_id: &str) -> CoreResult<WireMessage> {
        let peer = self
            .peers
            .get(peer_id)
            .await
            .ok_or_else(|| CoreError::NotFound(peer_id.to_string()))?;
        Ok(WireMessage::SyncRequest {
            requestor_id: self.node_id.clone(),
            last_known_clock: peer.vector_clock,
            timestamp: now(),
        })
    }

    /// Answers a `sync_request` with every delta strictly newer than the
    /// requestor's last known clock.
    pub async fn handle_sync_request(&self, last_known_clock: &ClockSnapshot) -> WireMessage {
        let deltas = self.log.get_since(last_known_clock).await;
        WireMessage::SyncResponse {
            responder_id: self.node_id.clone(),
            deltas,
            current_clock: self.clock.snapshot(),
            timestamp: now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;

    fn manager(node: &str) -> Arc<SyncManager> {
        SyncManager::new(
            node,
            node,
            Arc::new(VectorClock::new()),
            Arc::new(DeltaLog::new(1000)),
            Arc::new(PeerRegistry::new(Arc::new(PubSub::new(16)))),
            LoopbackTransport::new(node),
            Arc::new(PubSub::new(16)),
            Arc::new(LoggingConflictHandler),
        )
    }

    #[tokio::test]
    async fn local_file_change_increments_clock_and_appends() {
        let manager = manager("n1");
        let delta = manager
            .handle_file_change(FileChangePayload {
                file_path: "a.go".to_string(),
                file_hash: Some("h1".to_string()),
                file_diff: None,
            })
            .await;
        assert_eq!(delta.vector_clock.get("n1"), Some(&1));
        assert_eq!(manager.log.size().await, 1);
    }

    #[tokio::test]
    async fn duplicate_remote_delta_is_dropped() {
        let manager = manager("n1");
        let mut clock = ClockSnapshot::new();
        clock.insert("n2".to_string(), 1);
        let delta = Delta::new(
            "n2",
            "n2",
            clock,
            DeltaPayload::AgentStatus(crate::delta::AgentStatusPayload {
                agent_id: "n2".to_string(),
                state: "online".to_string(),
            }),
        );

        assert!(manager.handle_remote_delta(delta.clone()).await);
        assert!(!manager.handle_remote_delta(delta).await);
        assert_eq!(manager.log.size().await, 1);
    }

    #[tokio::test]
    async fn merging_a_remote_clock_dominates_afterwards() {
        let manager = manager("n1");
        let mut clock = ClockSnapshot::new();
        clock.insert("n2".to_string(), 3);
        let delta = Delta::new(
            "n2",
            "n2",
            clock,
            DeltaPayload::AgentStatus(crate::delta::AgentStatusPayload {
                agent_id: "n2".to_string(),
                state: "online".to_string(),
            }),
        );
        manager.handle_remote_delta(delta.clone()).await;
        assert_eq!(manager.clock.compare_snapshot(&delta.vector_clock), CausalOrder::After);
    }
}
