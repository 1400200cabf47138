use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};

use super::{new_lock_id, FencingCounter, LockStore, SemanticLock, DEFAULT_LEASE, MAX_LEASE, MAX_RENEWALS};
use crate::errors::{CoreError, CoreResult};
use crate::event::{Event, EventKind, LockAcquiredData, LockConflictData, LockIdData};
use crate::pubsub::PubSub;
use crate::semantic::SemanticTarget;
use crate::transport::{Transport, TOPIC_LOCK};
use crate::utils::{now, seconds, DateTime, DateTimeExt};
use crate::wire::WireMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Pending,
    Approved,
    Denied,
    Escalated,
}

#[derive(Debug, Clone)]
pub struct NegotiationSession {
    pub id: String,
    pub intent_lock: SemanticLock,
    pub voters: HashSet<String>,
    pub votes: HashMap<String, bool>,
    pub state: NegotiationState,
    pub deadline: DateTime,
}

struct SessionEntry {
    session: NegotiationSession,
    notify: Arc<Notify>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Confirmed,
    Conflict,
    RolledBack,
}

#[derive(Debug, Clone)]
struct PendingLock {
    lock: SemanticLock,
    status: PendingStatus,
    auto_rollback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockResult {
    pub success: bool,
    pub lock: Option<SemanticLock>,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PendingStatus>,
}

/// Two-phase intent→acquire negotiator, plus the local-first optimistic
/// path as a second entry point over the same store (spec §4.3).
pub struct LockNegotiator {
    node_id: String,
    node_name: String,
    store: Arc<LockStore>,
    fencing: Arc<FencingCounter>,
    transport: Arc<dyn Transport>,
    events: Arc<PubSub<Event>>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    pending: RwLock<HashMap<String, PendingLock>>,
    negotiation_deadline: Duration,
    confirmation_timeout: Duration,
    auto_rollback: bool,
}

impl LockNegotiator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: impl Into<String>,
        node_name: impl Into<String>,
        store: Arc<LockStore>,
        fencing: Arc<FencingCounter>,
        transport: Arc<dyn Transport>,
        events: Arc<PubSub<Event>>,
        negotiation_deadline: Duration,
        confirmation_timeout: Duration,
        auto_rollback: bool,
    ) -> Arc<Self> {
        Arc::new(LockNegotiator {
            node_id: node_id.into(),
            node_name: node_name.into(),
            store,
            fencing,
            transport,
            events,
            sessions: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            negotiation_deadline,
            confirmation_timeout,
            auto_rollback,
        })
    }

    fn mint_lock(&self, target: SemanticTarget, intention: String) -> SemanticLock {
        SemanticLock {
            id: new_lock_id(),
            target,
            holder_id: self.node_id.clone(),
            holder_name: self.node_name.clone(),
            intention,
            fencing_token: self.fencing.next(),
            acquired_at: now(),
            expires_at: now().plus(DEFAULT_LEASE),
            renew_count: 0,
        }
    }

    async fn broadcast(&self, message: WireMessage) {
        match message.to_bytes() {
            Ok(bytes) => self.transport.broadcast(TOPIC_LOCK, bytes).await,
            Err(err) => log::warn!("failed to encode lock message: {err}"),
        }
    }

    fn publish(&self, event: Event) {
        self.events.publish(event);
    }

    /// Two-phase intent→acquire path (spec §4.3 steps 1-4). An intent is
    /// minted and broadcast (consuming a fencing token) before a same-node
    /// conflict is rejected, matching spec §8 scenario 2.
    pub async fn acquire(&self, target: SemanticTarget, intention: String) -> CoreResult<LockResult> {
        let conflicts = self.store.find_conflicts(&target).await;

        let lock = self.mint_lock(target.clone(), intention);
        self.broadcast(WireMessage::LockIntent { lock: lock.clone() }).await;

        if let Some(own) = conflicts.iter().find(|l| l.holder_id == self.node_id) {
            return Err(CoreError::Conflict(own.id.clone()));
        }

        let remote_holders: HashSet<String> = conflicts.iter().map(|l| l.holder_id.clone()).collect();
        if remote_holders.is_empty() {
            return self.approve(lock).await;
        }

        let deadline = now().plus(self.negotiation_deadline);
        let notify = Arc::new(Notify::new());
        let session_id = lock.id.clone();
        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(
                session_id.clone(),
                SessionEntry {
                    session: NegotiationSession {
                        id: session_id.clone(),
                        intent_lock: lock.clone(),
                        voters: remote_holders,
                        votes: HashMap::new(),
                        state: NegotiationState::Pending,
                        deadline,
                    },
                    notify: notify.clone(),
                },
            );
        }

        let outcome = self.wait_for_votes(&session_id, deadline, notify).await;
        self.sessions.write().await.remove(&session_id);

        match outcome {
            NegotiationState::Approved => self.approve(lock).await,
            NegotiationState::Denied => Ok(LockResult {
                success: false,
                lock: None,
                reason: Some(format!("conflict with existing lock: {}", lock.target.id())),
                status: None,
            }),
            NegotiationState::Escalated => {
                self.publish(Event::new(
                    EventKind::LockConflict,
                    LockConflictData {
                        file_path: lock.target.file_path.clone(),
                        holder_id: "unknown".to_string(),
                        requester_id: lock.holder_id.clone(),
                        intention: lock.intention.clone(),
                    },
                ));
                Err(CoreError::NegotiationFailed(format!(
                    "negotiation for {} escalated without resolution",
                    lock.target.id()
                )))
            }
            NegotiationState::Pending => unreachable!("wait_for_votes never returns Pending"),
        }
    }

    async fn approve(&self, lock: SemanticLock) -> CoreResult<LockResult> {
        self.store.add(lock.clone()).await?;
        self.broadcast(WireMessage::LockAcquired { lock: lock.clone() }).await;
        self.publish(Event::new(EventKind::LockAcquired, LockAcquiredData {
            lock_id: lock.id.clone(),
            file_path: lock.target.file_path.clone(),
            start_line: lock.target.start_line,
            end_line: lock.target.end_line,
            agent_id: lock.holder_id.clone(),
            intention: lock.intention.clone(),
        }));
        Ok(LockResult {
            success: true,
            lock: Some(lock),
            reason: None,
            status: None,
        })
    }

    async fn wait_for_votes(&self, session_id: &str, deadline: DateTime, notify: Arc<Notify>) -> NegotiationState {
        loop {
            {
                let sessions = self.sessions.read().await;
                if let Some(entry) = sessions.get(session_id) {
                    if entry.session.state != NegotiationState::Pending {
                        return entry.session.state;
                    }
                } else {
                    return NegotiationState::Denied;
                }
            }
            let remaining = deadline.duration_since(now());
            if remaining == Duration::ZERO {
                return NegotiationState::Escalated;
            }
            let _ = tokio::time::timeout(remaining, notify.notified()).await;
        }
    }

    /// Records a peer's vote for an in-flight session.
    pub async fn handle_vote(&self, session_id: &str, voter_id: &str, approve: bool) {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get_mut(session_id) {
            if !approve {
                entry.session.state = NegotiationState::Denied;
            } else {
                entry.session.votes.insert(voter_id.to_string(), true);
                if entry.session.voters.iter().all(|v| entry.session.votes.contains_key(v)) {
                    entry.session.state = NegotiationState::Approved;
                }
            }
            entry.notify.notify_waiters();
        }
    }

    /// A peer's `lock_intent` arrived. No merge logic is implemented (spec
    /// §1 non-goal: no automatic merging), so a holder of a conflicting
    /// lock always nacks; a non-conflicting peer stays silent.
    pub async fn handle_intent(&self, lock: SemanticLock) {
        if lock.holder_id == self.node_id {
            return;
        }
        if let Some(mine) = self.store.find_conflicts(&lock.target).await.into_iter().find(|l| l.holder_id == self.node_id) {
            self.broadcast(WireMessage::LockVote {
                session_id: lock.id.clone(),
                voter_id: self.node_id.clone(),
                approve: false,
                reason: Some(format!("conflict with {}", mine.id)),
            })
            .await;
            self.publish(Event::new(
                EventKind::LockConflict,
                LockConflictData {
                    file_path: lock.target.file_path.clone(),
                    holder_id: mine.holder_id.clone(),
                    requester_id: lock.holder_id.clone(),
                    intention: lock.intention.clone(),
                },
            ));
        }
    }

    pub async fn renew(&self, id: &str, requested_ttl: Option<Duration>) -> CoreResult<SemanticLock> {
        let mut lock = self.store.get(id).await?;
        if lock.holder_id != self.node_id {
            return Err(CoreError::NotHolder);
        }
        if lock.renew_count >= MAX_RENEWALS {
            return Err(CoreError::MaxRenewalsExceeded);
        }
        let ttl = requested_ttl.unwrap_or(DEFAULT_LEASE).min(MAX_LEASE);
        lock.expires_at = now().plus(ttl);
        lock.renew_count += 1;
        self.store.replace(lock.clone()).await;
        Ok(lock)
    }

    pub async fn release(&self, id: &str) -> CoreResult<SemanticLock> {
        let lock = self.store.get(id).await?;
        if lock.holder_id != self.node_id {
            return Err(CoreError::NotHolder);
        }
        self.store.remove(id).await?;
        self.pending.write().await.remove(id);
        self.broadcast(WireMessage::LockReleased { lock_id: id.to_string() }).await;
        self.publish(Event::new(EventKind::LockReleased, LockIdData { lock_id: id.to_string() }));
        Ok(lock)
    }

    /// Local-first optimistic path (spec §4.3): acquires locally right
    /// away, broadcasts asynchronously, then starts a confirmation timer.
    pub async fn acquire_optimistic(self: &Arc<Self>, target: SemanticTarget, intention: String) -> CoreResult<LockResult> {
        let conflicts = self.store.find_conflicts(&target).await;
        if let Some(own) = conflicts.iter().find(|l| l.holder_id == self.node_id) {
            return Err(CoreError::Conflict(own.id.clone()));
        }

        let lock = self.mint_lock(target, intention);
        self.store.add(lock.clone()).await?;
        self.pending.write().await.insert(
            lock.id.clone(),
            PendingLock {
                lock: lock.clone(),
                status: PendingStatus::Pending,
                auto_rollback: self.auto_rollback,
            },
        );

        self.broadcast(WireMessage::LockAcquired { lock: lock.clone() }).await;
        self.publish(Event::new(EventKind::LockAcquired, LockAcquiredData {
            lock_id: lock.id.clone(),
            file_path: lock.target.file_path.clone(),
            start_line: lock.target.start_line,
            end_line: lock.target.end_line,
            agent_id: lock.holder_id.clone(),
            intention: lock.intention.clone(),
        }));

        let negotiator = self.clone();
        let lock_id = lock.id.clone();
        let timeout = self.confirmation_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            negotiator.confirm_if_pending(&lock_id).await;
        });

        Ok(LockResult {
            success: true,
            lock: Some(lock),
            reason: None,
            status: Some(PendingStatus::Pending),
        })
    }

    async fn confirm_if_pending(&self, lock_id: &str) {
        let mut pending = self.pending.write().await;
        if let Some(p) = pending.get_mut(lock_id) {
            if p.status == PendingStatus::Pending {
                p.status = PendingStatus::Confirmed;
            }
        }
    }

    pub async fn pending_status(&self, lock_id: &str) -> Option<PendingStatus> {
        self.pending.read().await.get(lock_id).map(|p| p.status)
    }

    /// A peer's `lock_acquired` arrived. Updates visibility of their lock
    /// and, in optimistic mode, checks whether it conflicts with one of
    /// our own still-pending locks.
    pub async fn handle_remote_acquired(self: &Arc<Self>, lock: SemanticLock) {
        if lock.holder_id == self.node_id {
            return;
        }
        self.check_optimistic_conflict(&lock).await;
        self.store.replace(lock).await;
    }

    async fn check_optimistic_conflict(self: &Arc<Self>, remote: &SemanticLock) {
        let conflicting_ids: Vec<String> = {
            let mut pending = self.pending.write().await;
            let ids: Vec<String> = pending
                .values()
                .filter(|p| p.status == PendingStatus::Pending && p.lock.id != remote.id && p.lock.target.overlaps(&remote.target))
                .map(|p| p.lock.id.clone())
                .collect();
            for id in &ids {
                if let Some(p) = pending.get_mut(id) {
                    p.status = PendingStatus::Conflict;
                }
            }
            ids
        };

        for lock_id in conflicting_ids {
            self.publish(Event::new(
                EventKind::LockConflict,
                LockConflictData {
                    file_path: remote.target.file_path.clone(),
                    holder_id: remote.holder_id.clone(),
                    requester_id: self.node_id.clone(),
                    intention: remote.intention.clone(),
                },
            ));
            self.rollback_if_needed(&lock_id).await;
        }
    }

    async fn rollback_if_needed(self: &Arc<Self>, lock_id: &str) {
        let should_rollback = {
            let pending = self.pending.read().await;
            pending
                .get(lock_id)
                .map(|p| p.status == PendingStatus::Conflict && p.auto_rollback)
                .unwrap_or(false)
        };
        if !should_rollback {
            return;
        }
        if self.store.remove(lock_id).await.is_ok() {
            self.broadcast(WireMessage::LockReleased {
                lock_id: lock_id.to_string(),
            })
            .await;
            if let Some(p) = self.pending.write().await.get_mut(lock_id) {
                p.status = PendingStatus::RolledBack;
            }
        }
    }

    /// A peer's `lock_released` arrived. Removes the lock if we don't hold it.
    pub async fn handle_remote_released(&self, lock_id: &str) {
        if let Ok(existing) = self.store.get(lock_id).await {
            if existing.holder_id != self.node_id {
                let _ = self.store.remove(lock_id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::TargetKind;
    use crate::transport::LoopbackTransport;

    fn negotiator(node: &str) -> Arc<LockNegotiator> {
        LockNegotiator::new(
            node,
            node,
            Arc::new(LockStore::new()),
            Arc::new(FencingCounter::new()),
            LoopbackTransport::new(node),
            Arc::new(PubSub::new(64)),
            seconds(1),
            seconds(1),
            true,
        )
    }

    fn target(start: u32, end: u32) -> SemanticTarget {
        SemanticTarget::new(TargetKind::Function, "a.go", "f", start, end, None).unwrap()
    }

    #[tokio::test]
    async fn scenario_one_single_node_acquire_release() {
        let n1 = negotiator("n1");
        let result = n1.acquire(target(1, 10), "edit".to_string()).await.unwrap();
        assert!(result.success);
        let lock_id = result.lock.unwrap().id;

        let listed = n1.store.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].fencing_token, 1);

        n1.release(&lock_id).await.unwrap();
        assert!(n1.store.list().await.is_empty());
    }

    #[tokio::test]
    async fn scenario_two_overlap_conflict_same_node_advances_fencing() {
        let n1 = negotiator("n1");
        n1.acquire(target(1, 10), "edit".to_string()).await.unwrap();

        let result = n1.acquire(target(5, 15), "other".to_string()).await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));

        // Intent allocated a token before the rejection (spec scenario 2).
        assert_eq!(n1.fencing.next(), 3);
    }

    #[tokio::test]
    async fn release_by_non_holder_is_rejected() {
        let n1 = negotiator("n1");
        let result = n1.acquire(target(1, 10), "edit".to_string()).await.unwrap();
        let lock_id = result.lock.unwrap().id;

        // Simulate a remote view of the same lock under a different id.
        let stray = n1.release("does-not-exist").await;
        assert!(matches!(stray, Err(CoreError::NotFound(_))));

        let mut foreign_lock = n1.store.get(&lock_id).await.unwrap();
        foreign_lock.holder_id = "n2".to_string();
        n1.store.replace(foreign_lock).await;
        assert!(matches!(n1.release(&lock_id).await, Err(CoreError::NotHolder)));
    }

    #[tokio::test]
    async fn renew_rejects_non_holder_and_over_max() {
        let n1 = negotiator("n1");
        let result = n1.acquire(target(1, 10), "edit".to_string()).await.unwrap();
        let mut lock = result.lock.unwrap();
        lock.renew_count = MAX_RENEWALS;
        n1.store.replace(lock.clone()).await;
        assert!(matches!(n1.renew(&lock.id, None).await, Err(CoreError::MaxRenewalsExceeded)));
    }
}
