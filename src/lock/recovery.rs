use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{LockStore, SemanticLock};
use crate::event::{Event, EventKind, LockConflictData};
use crate::pubsub::PubSub;
use crate::utils::DateTime;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub reconciled: u32,
    pub removed: u32,
    pub resolved_automatically: u32,
    pub escalated: u32,
}

/// Post-partition lock reconciliation (spec §4.4). Given the set of remote
/// locks collected from every peer's `lock_state_response`, reconciles
/// them against the local store using the fencing-token and
/// `acquired_at` tiebreak policy; ties on both escalate to human
/// intervention, surfaced as both an error-shaped report entry and a
/// `lock.conflict` event (spec §9 Open Question 1).
pub struct LockRecovery {
    node_id: String,
    store: Arc<LockStore>,
    events: Arc<PubSub<Event>>,
}

impl LockRecovery {
    pub fn new(node_id: impl Into<String>, store: Arc<LockStore>, events: Arc<PubSub<Event>>) -> Self {
        LockRecovery {
            node_id: node_id.into(),
            store,
            events,
        }
    }

    /// `remote_locks` should already be sorted by `acquired_at` as the
    /// peer replies specify (spec §4.4 step 2); this function is
    /// idempotent, so running it twice on the same inputs leaves the
    /// store unchanged the second time (spec §8 invariant 9).
    pub async fn reconcile(&self, since: DateTime, remote_locks: Vec<SemanticLock>) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let mut seen_ids = std::collections::HashSet::new();

        for remote in remote_locks {
            seen_ids.insert(remote.id.clone());

            if let Ok(local) = self.store.get(&remote.id).await {
                if local.fencing_token != remote.fencing_token {
                    let winner = if remote.fencing_token > local.fencing_token { remote.clone() } else { local };
                    self.store.replace(winner).await;
                    report.reconciled += 1;
                    report.resolved_automatically += 1;
                } else if local != remote {
                    // Same id, same token, but the rest disagrees: a
                    // genuine tie, not a harmless re-delivery.
                    self.escalate(&remote, &mut report).await;
                }
                continue;
            }

            let overlap = self.store.find_conflicts(&remote.target).await;
            match overlap.into_iter().find(|l| l.id != remote.id) {
                None => {
                    self.store.replace(remote).await;
                    report.reconciled += 1;
                }
                Some(local) => {
                    if local.acquired_at != remote.acquired_at {
                        let older_is_local = local.acquired_at < remote.acquired_at;
                        if older_is_local {
                            report.resolved_automatically += 1;
                        } else {
                            self.store.replace(remote).await;
                            report.removed += 1;
                            report.resolved_automatically += 1;
                        }
                    } else if remote.fencing_token != local.fencing_token {
                        if remote.fencing_token > local.fencing_token {
                            self.store.replace(remote).await;
                            report.removed += 1;
                        }
                        report.resolved_automatically += 1;
                    } else {
                        self.escalate(&remote, &mut report).await;
                    }
                }
            }
        }

        // Local non-owned locks acquired before the partition and absent
        // from every remote response are assumed released.
        for local in self.store.list().await {
            if local.holder_id == self.node_id {
                continue;
            }
            if local.acquired_at < since && !seen_ids.contains(&local.id) {
                if self.store.remove(&local.id).await.is_ok() {
                    report.removed += 1;
                }
            }
        }

        report
    }

    async fn escalate(&self, remote: &SemanticLock, report: &mut RecoveryReport) {
        report.escalated += 1;
        self.events.publish(Event::new(
            EventKind::LockConflict,
            LockConflictData {
                file_path: remote.target.file_path.clone(),
                holder_id: remote.holder_id.clone(),
                requester_id: self.node_id.clone(),
                intention: remote.intention.clone(),
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{SemanticTarget, TargetKind};
    use crate::utils::{now, seconds, DateTimeExt};

    fn lock(id: &str, holder: &str, token: u64, acquired_at: DateTime, start: u32, end: u32) -> SemanticLock {
        SemanticLock {
            id: id.to_string(),
            target: SemanticTarget::new(TargetKind::Function, "a.go", "f", start, end, None).unwrap(),
            holder_id: holder.to_string(),
            holder_name: holder.to_string(),
            intention: "edit".to_string(),
            fencing_token: token,
            acquired_at,
            expires_at: acquired_at.plus(seconds(300)),
            renew_count: 0,
        }
    }

    #[tokio::test]
    async fn scenario_five_fencing_and_overlap_tiebreaks() {
        let store = Arc::new(LockStore::new());
        let events = Arc::new(PubSub::new(16));
        let partition_start = now();

        let older_n1_lock = lock("L7", "n1", 7, partition_start.plus(seconds(1)), 1, 10);
        store.add(older_n1_lock).await.unwrap();

        let recovery = LockRecovery::new("n1", store.clone(), events);

        // N1 re-acquired the same target during the partition producing a
        // newer lock with a higher fencing token under the same id, and N2
        // independently acquired an overlapping target.
        let n1_newer = lock("L7", "n1", 8, partition_start.plus(seconds(5)), 1, 10);
        let n2_overlap = lock("L42", "n2", 42, partition_start.plus(seconds(10)), 5, 15);

        let report = recovery.reconcile(partition_start, vec![n1_newer.clone(), n2_overlap]).await;

        let resolved = store.get("L7").await.unwrap();
        assert_eq!(resolved.fencing_token, 8);
        assert_eq!(report.resolved_automatically, 2);
        assert_eq!(report.escalated, 0);
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let store = Arc::new(LockStore::new());
        let events = Arc::new(PubSub::new(16));
        let recovery = LockRecovery::new("n1", store.clone(), events);
        let partition_start = now();
        let remote = lock("L1", "n2", 1, partition_start.plus(seconds(1)), 1, 10);

        let first = recovery.reconcile(partition_start, vec![remote.clone()]).await;
        let snapshot_after_first = store.list().await;
        let second = recovery.reconcile(partition_start, vec![remote]).await;
        let snapshot_after_second = store.list().await;

        assert_eq!(first.reconciled, 1);
        assert_eq!(second.reconciled, 0);
        assert_eq!(snapshot_after_first.len(), snapshot_after_second.len());
    }

    #[tokio::test]
    async fn same_id_equal_fencing_token_escalates() {
        let store = Arc::new(LockStore::new());
        let events = Arc::new(PubSub::new(16));
        let partition_start = now();
        let local = lock("L1", "n1", 3, partition_start, 1, 10);
        store.add(local).await.unwrap();

        let recovery = LockRecovery::new("n1", store.clone(), events);
        let remote = lock("L1", "n2", 3, partition_start.plus(seconds(1)), 1, 10);
        let report = recovery.reconcile(partition_start, vec![remote]).await;

        assert_eq!(report.escalated, 1);
    }

    #[tokio::test]
    async fn absent_non_owned_lock_acquired_before_partition_is_removed() {
        let store = Arc::new(LockStore::new());
        let events = Arc::new(PubSub::new(16));
        let partition_start = now();
        let stale = lock("L1", "n2", 1, partition_start - chrono::Duration::seconds(10), 1, 10);
        store.add(stale).await.unwrap();

        let recovery = LockRecovery::new("n1", store.clone(), events);
        let report = recovery.reconcile(partition_start, vec![]).await;

        assert_eq!(report.removed, 1);
        assert!(store.list().await.is_empty());
    }
}
