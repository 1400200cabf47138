//! Hosts one instance of every component: lock negotiation, sync, the
//! registries, and the audit store, behind two Unix sockets (spec §4.9).

pub mod identity;
pub mod rpc;
pub mod server;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use self::identity::NodeIdentity;
use self::rpc::{
    AgentsListResult, ContextWatchParams, ContextWatchResult, InitParams, InitResult, JoinParams, JoinResult, LockAcquireParams,
    LockAcquireResult, LockListResult, LockReleaseParams, LockReleaseResult, PeerSummary, PeersListResult, RpcRequest, RpcResponse,
    StatusResult,
};
use crate::audit::AuditStore;
use crate::config::DaemonConfig;
use crate::delta::DeltaLog;
use crate::event::{Event, EventKind};
use crate::lock::{FencingCounter, LockNegotiator, LockRecovery, LockStore};
use crate::pubsub::PubSub;
use crate::registry::{AgentRegistry, PeerRegistry};
use crate::semantic::{SemanticTarget, TargetKind};
use crate::sync::{ContextRecovery, LoggingConflictHandler, SyncManager};
use crate::transport::{LoopbackTransport, Transport};
use crate::vector_clock::VectorClock;

/// Everything the daemon binds together. Constructed once at startup;
/// shared with every RPC connection and background task via `Arc`.
pub struct Daemon {
    node_id: String,
    node_name: String,
    config: DaemonConfig,
    started_at: Instant,
    identity: RwLock<NodeIdentity>,

    store: Arc<LockStore>,
    negotiator: Arc<LockNegotiator>,
    recovery: LockRecovery,
    delta_log: Arc<DeltaLog>,
    sync_manager: Arc<SyncManager>,
    context_recovery: ContextRecovery,
    peers: Arc<PeerRegistry>,
    agents: Arc<AgentRegistry>,
    transport: Arc<dyn Transport>,
    events: Arc<PubSub<Event>>,
    audit: Option<Arc<AuditStore>>,
    watched_files: RwLock<HashSet<String>>,
    cancel: CancellationToken,
}

impl Daemon {
    pub async fn new(config: DaemonConfig) -> anyhow::Result<Arc<Self>> {
        let identity = NodeIdentity::load_or_create(&config.data_dir, config.node_id.clone())?;

        let node_id = identity.node_id.clone();
        let node_name = config.node_name.clone();

        let events = Arc::new(PubSub::new(256));
        let transport = LoopbackTransport::new(node_id.clone());
        let fencing = Arc::new(FencingCounter::new());
        let clock = Arc::new(VectorClock::new());
        let delta_log = Arc::new(DeltaLog::new(config.delta_log_capacity));
        let store = Arc::new(LockStore::with_history_capacity(config.lock_history_capacity));
        let peers = Arc::new(PeerRegistry::with_offline_threshold(events.clone(), config.peer_offline_threshold));
        let agents = Arc::new(AgentRegistry::with_offline_threshold(events.clone(), config.agent_offline_threshold));

        let negotiator = LockNegotiator::new(
            node_id.clone(),
            node_name.clone(),
            store.clone(),
            fencing.clone(),
            transport.clone(),
            events.clone(),
            config.negotiation_deadline,
            config.confirmation_timeout,
            config.auto_rollback,
        );
        let recovery = LockRecovery::new(node_id.clone(), store.clone(), events.clone());

        let sync_manager = SyncManager::new(
            node_id.clone(),
            node_name.clone(),
            clock,
            delta_log.clone(),
            peers.clone(),
            transport.clone(),
            events.clone(),
            Arc::new(LoggingConflictHandler),
        );
        let context_recovery = ContextRecovery::new(sync_manager.clone(), events.clone());

        let audit = if config.audit_enabled {
            Some(AuditStore::spawn(config.audit_log_path()))
        } else {
            None
        };

        Ok(Arc::new(Daemon {
            node_id,
            node_name,
            config,
            started_at: Instant::now(),
            identity: RwLock::new(identity),
            store,
            negotiator,
            recovery,
            delta_log,
            sync_manager,
            context_recovery,
            peers,
            agents,
            transport,
            events,
            audit,
            watched_files: RwLock::new(HashSet::new()),
            cancel: CancellationToken::new(),
        }))
    }

    pub fn events(&self) -> &Arc<PubSub<Event>> {
        &self.events
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns every background task (sweepers, heartbeat, remote-message
    /// listeners) and binds both sockets. Returns once everything is bound;
    /// the tasks themselves keep running until `shutdown()` is called.
    pub async fn serve(self: &Arc<Self>) -> anyhow::Result<()> {
        self.store.spawn_sweeper(self.cancel.clone());
        self.peers.spawn_sweeper(self.cancel.clone());
        self.agents.spawn_sweeper(self.cancel.clone());
        self.sync_manager.spawn_heartbeat(self.cancel.clone());
        self.spawn_lock_listener();
        self.spawn_context_listener();

        server::spawn_rpc_server(self.clone(), &self.config.rpc_socket, self.cancel.clone())?;
        server::spawn_event_server(self.clone(), &self.config.event_socket, self.cancel.clone())?;

        self.events.publish(Event::without_data(EventKind::DaemonReady));
        Ok(())
    }

    fn spawn_lock_listener(self: &Arc<Self>) {
        let daemon = self.clone();
        tokio::spawn(async move {
            let mut stream = daemon.transport.subscribe(crate::transport::TOPIC_LOCK).await;
            while let Some((sender, bytes)) = stream.recv().await {
                if sender == daemon.node_id {
                    continue;
                }
                match crate::wire::WireMessage::from_bytes(&bytes) {
                    Ok(message) => daemon.handle_lock_message(message).await,
                    Err(err) => log::warn!("dropping malformed lock message: {err}"),
                }
            }
        });
    }

    fn spawn_context_listener(self: &Arc<Self>) {
        let daemon = self.clone();
        tokio::spawn(async move {
            let mut stream = daemon.transport.subscribe(crate::transport::TOPIC_CONTEXT).await;
            while let Some((sender, bytes)) = stream.recv().await {
                if sender == daemon.node_id {
                    continue;
                }
                match crate::wire::WireMessage::from_bytes(&bytes) {
                    Ok(crate::wire::WireMessage::Delta { delta }) => {
                        daemon.sync_manager.handle_remote_delta(delta).await;
                    }
                    Ok(crate::wire::WireMessage::SyncRequest { last_known_clock, .. }) => {
                        let response = daemon.sync_manager.handle_sync_request(&last_known_clock).await;
                        if let Ok(bytes) = response.to_bytes() {
                            daemon.transport.broadcast(crate::transport::TOPIC_CONTEXT, bytes).await;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => log::warn!("dropping malformed context message: {err}"),
                }
            }
        });
    }

    async fn handle_lock_message(&self, message: crate::wire::WireMessage) {
        use crate::wire::WireMessage;
        match message {
            WireMessage::LockIntent { lock } => self.negotiator.handle_intent(lock).await,
            WireMessage::LockVote { session_id, voter_id, approve, .. } => {
                self.negotiator.handle_vote(&session_id, &voter_id, approve).await
            }
            WireMessage::LockAcquired { lock } => self.negotiator.handle_remote_acquired(lock).await,
            WireMessage::LockReleased { lock_id } => self.negotiator.handle_remote_released(&lock_id).await,
            WireMessage::LockStateRequest { .. } => {
                let locks = self.store.list().await;
                let response = WireMessage::LockStateResponse {
                    responder_id: self.node_id.clone(),
                    locks,
                    timestamp: crate::utils::now(),
                };
                if let Ok(bytes) = response.to_bytes() {
                    self.transport.broadcast(crate::transport::TOPIC_LOCK, bytes).await;
                }
            }
            _ => {}
        }
    }

    /// Collects deltas from every peer's `sync_response` and replays them
    /// through [`ContextRecovery`] (spec §4.8). Callers trigger this after
    /// detecting a healed partition; it is not run automatically per-message.
    pub async fn recover_context(&self, responses: Vec<crate::wire::WireMessage>) -> crate::sync::ContextRecoveryReport {
        self.context_recovery.recover(responses).await
    }

    /// Reconciles the lock store against every peer's `lock_state_response`
    /// collected after a healed partition (spec §4.4).
    pub async fn recover_locks(
        &self,
        since: crate::utils::DateTime,
        remote_locks: Vec<crate::lock::SemanticLock>,
    ) -> crate::lock::RecoveryReport {
        self.recovery.reconcile(since, remote_locks).await
    }

    pub async fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        match request.verb.as_str() {
            "status" => RpcResponse::ok(self.status().await),
            "init" => self.handle_init(request.params).await,
            "join" => self.handle_join(request.params).await,
            "lock.acquire" => self.handle_lock_acquire(request.params).await,
            "lock.release" => self.handle_lock_release(request.params).await,
            "lock.list" => RpcResponse::ok(LockListResult { locks: self.store.list().await }),
            "peers.list" => RpcResponse::ok(self.peers_list().await),
            "agents.list" => RpcResponse::ok(AgentsListResult { agents: self.agents.list().await }),
            "embed" => RpcResponse::err("embedding provider not configured"),
            "search" => RpcResponse::err("embedding provider not configured"),
            "context.watch" => self.handle_context_watch(request.params).await,
            "shutdown" => {
                self.shutdown().await;
                RpcResponse::ok(serde_json::json!({}))
            }
            other => RpcResponse::err(format!("unknown verb: {other}")),
        }
    }

    async fn status(&self) -> StatusResult {
        StatusResult {
            node_id: self.node_id.clone(),
            node_name: self.node_name.clone(),
            cluster_id: self.identity.read().await.cluster_id.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            lock_count: self.store.list().await.len(),
            peer_count: self.peers.list().await.len(),
            agent_count: self.agents.list().await.len(),
            delta_count: self.delta_log.size().await,
        }
    }

    async fn handle_init(&self, params: serde_json::Value) -> RpcResponse {
        let params: InitParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => return RpcResponse::err(format!("invalid init params: {err}")),
        };
        let mut identity = self.identity.write().await;
        let invite_token = identity.init_cluster(params.project_name);
        if let Err(err) = identity.persist(&self.config.data_dir) {
            return RpcResponse::err(format!("failed to persist cluster identity: {err}"));
        }
        RpcResponse::ok(InitResult {
            cluster_id: identity.cluster_id.clone().unwrap_or_default(),
            invite_token,
        })
    }

    async fn handle_join(&self, params: serde_json::Value) -> RpcResponse {
        let params: JoinParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => return RpcResponse::err(format!("invalid join params: {err}")),
        };
        let mut identity = self.identity.write().await;
        match identity.join_cluster(&params.token) {
            Ok(()) => {
                if let Err(err) = identity.persist(&self.config.data_dir) {
                    return RpcResponse::ok(JoinResult {
                        success: false,
                        cluster_id: None,
                        error: Some(format!("joined but failed to persist: {err}")),
                    });
                }
                RpcResponse::ok(JoinResult {
                    success: true,
                    cluster_id: identity.cluster_id.clone(),
                    error: None,
                })
            }
            Err(err) => RpcResponse::ok(JoinResult {
                success: false,
                cluster_id: None,
                error: Some(err.to_string()),
            }),
        }
    }

    async fn handle_lock_acquire(&self, params: serde_json::Value) -> RpcResponse {
        let params: LockAcquireParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => return RpcResponse::err(format!("invalid lock.acquire params: {err}")),
        };
        let target = match SemanticTarget::new(
            TargetKind::File,
            params.file_path.clone(),
            params.file_path,
            params.start_line,
            params.end_line,
            None,
        ) {
            Ok(target) => target,
            Err(err) => {
                return RpcResponse::ok(LockAcquireResult {
                    success: false,
                    lock_id: None,
                    error: Some(err.to_string()),
                })
            }
        };

        let result = if self.config.optimistic_mode {
            self.negotiator.acquire_optimistic(target, params.intention).await
        } else {
            self.negotiator.acquire(target, params.intention).await
        };

        match result {
            Ok(result) => {
                self.record_audit(&result.lock).await;
                RpcResponse::ok(LockAcquireResult {
                    success: result.success,
                    lock_id: result.lock.map(|l| l.id),
                    error: result.reason,
                })
            }
            Err(err) => RpcResponse::ok(LockAcquireResult {
                success: false,
                lock_id: None,
                error: Some(err.to_string()),
            }),
        }
    }

    async fn record_audit(&self, lock: &Option<crate::lock::SemanticLock>) {
        let Some(audit) = &self.audit else { return };
        let Some(lock) = lock else { return };
        audit.record(crate::audit::AuditEntry {
            time: crate::utils::now(),
            action: crate::lock::LockAction::Acquired,
            lock_id: lock.id.clone(),
            holder: lock.holder_id.clone(),
            target: lock.target.clone(),
        });
    }

    async fn handle_lock_release(&self, params: serde_json::Value) -> RpcResponse {
        let params: LockReleaseParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => return RpcResponse::err(format!("invalid lock.release params: {err}")),
        };
        match self.negotiator.release(&params.lock_id).await {
            Ok(lock) => {
                if let Some(audit) = &self.audit {
                    audit.record(crate::audit::AuditEntry {
                        time: crate::utils::now(),
                        action: crate::lock::LockAction::Released,
                        lock_id: lock.id.clone(),
                        holder: lock.holder_id.clone(),
                        target: lock.target.clone(),
                    });
                }
                RpcResponse::ok(LockReleaseResult { success: true, error: None })
            }
            Err(err) => RpcResponse::ok(LockReleaseResult {
                success: false,
                error: Some(err.to_string()),
            }),
        }
    }

    async fn peers_list(&self) -> PeersListResult {
        let peers = self
            .peers
            .list()
            .await
            .into_iter()
            .map(|peer| PeerSummary {
                id: peer.id,
                addrs: Vec::new(),
                latency_ms: None,
                connected: peer.is_online,
            })
            .collect();
        PeersListResult { peers }
    }

    async fn handle_context_watch(&self, params: serde_json::Value) -> RpcResponse {
        let params: ContextWatchParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => return RpcResponse::err(format!("invalid context.watch params: {err}")),
        };
        self.watched_files.write().await.insert(params.file_path);
        RpcResponse::ok(ContextWatchResult { registered: true })
    }

    /// Stops every background task and publishes `daemon.shutdown`. Does
    /// not remove the socket files; the next `serve()` rebinds them.
    pub async fn shutdown(&self) {
        self.events.publish(Event::without_data(EventKind::DaemonShutdown));
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_daemon() -> Arc<Daemon> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.audit_enabled = false;
        std::mem::forget(dir);
        Daemon::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn status_reports_zero_counters_on_a_fresh_daemon() {
        let daemon = test_daemon().await;
        let status = daemon.status().await;
        assert_eq!(status.lock_count, 0);
        assert_eq!(status.peer_count, 0);
    }

    #[tokio::test]
    async fn init_then_join_share_the_same_cluster_id() {
        let daemon = test_daemon().await;
        let init = daemon
            .dispatch(RpcRequest {
                verb: "init".to_string(),
                params: serde_json::json!({ "projectName": "demo" }),
            })
            .await;
        assert!(init.ok);
        let invite_token = init.result.unwrap()["inviteToken"].as_str().unwrap().to_string();

        let other = test_daemon().await;
        let join = other
            .dispatch(RpcRequest {
                verb: "join".to_string(),
                params: serde_json::json!({ "token": invite_token }),
            })
            .await;
        assert!(join.ok);
        assert!(join.result.unwrap()["success"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn lock_acquire_then_release_round_trips_through_rpc() {
        let daemon = test_daemon().await;
        let acquire = daemon
            .dispatch(RpcRequest {
                verb: "lock.acquire".to_string(),
                params: serde_json::json!({
                    "filePath": "a.go",
                    "startLine": 1,
                    "endLine": 10,
                    "intention": "edit",
                }),
            })
            .await;
        assert!(acquire.ok);
        let lock_id = acquire.result.unwrap()["lockId"].as_str().unwrap().to_string();

        let release = daemon
            .dispatch(RpcRequest {
                verb: "lock.release".to_string(),
                params: serde_json::json!({ "lockId": lock_id }),
            })
            .await;
        assert!(release.result.unwrap()["success"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn unknown_verb_is_rejected() {
        let daemon = test_daemon().await;
        let response = daemon
            .dispatch(RpcRequest {
                verb: "not.a.verb".to_string(),
                params: serde_json::Value::Null,
            })
            .await;
        assert!(!response.ok);
    }

    #[tokio::test]
    async fn embed_and_search_are_opaque_stubs() {
        let daemon = test_daemon().await;
        let embed = daemon
            .dispatch(RpcRequest {
                verb: "embed".to_string(),
                params: serde_json::json!({ "text": "fn main() {}" }),
            })
            .await;
        assert!(!embed.ok);
    }
}
