use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use super::{HistoryEntry, LockAction, SemanticLock};
use crate::errors::{CoreError, CoreResult};
use crate::semantic::SemanticTarget;
use crate::utils::seconds;

const SWEEP_INTERVAL: std::time::Duration = seconds(10);
const DEFAULT_HISTORY_CAPACITY: usize = 100;

struct Inner {
    by_id: HashMap<String, SemanticLock>,
    by_target: HashMap<String, String>,
    history: VecDeque<HistoryEntry>,
    history_capacity: usize,
}

/// In-memory authoritative map of active locks, a bounded history ring, and
/// an expiry sweeper (spec §3.6, §4.1).
pub struct LockStore {
    inner: RwLock<Inner>,
}

impl LockStore {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(history_capacity: usize) -> Self {
        LockStore {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                by_target: HashMap::new(),
                history: VecDeque::with_capacity(history_capacity),
                history_capacity,
            }),
        }
    }

    /// Rejects if the target already has a non-expired lock.
    pub async fn add(&self, lock: SemanticLock) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        let target_id = lock.target.id();

        if let Some(existing_id) = inner.by_target.get(&target_id) {
            if let Some(existing) = inner.by_id.get(existing_id) {
                if !existing.is_expired() {
                    return Err(CoreError::Conflict(existing.id.clone()));
                }
            }
        }

        inner.by_target.insert(target_id, lock.id.clone());
        push_history(
            &mut inner.history,
            inner.history_capacity,
            HistoryEntry {
                timestamp: lock.acquired_at,
                action: LockAction::Acquired,
                lock_id: lock.id.clone(),
                holder: lock.holder_id.clone(),
                target: lock.target.clone(),
            },
        );
        inner.by_id.insert(lock.id.clone(), lock);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> CoreResult<SemanticLock> {
        let inner = self.inner.read().await;
        match inner.by_id.get(id) {
            None => Err(CoreError::NotFound(id.to_string())),
            Some(lock) if lock.is_expired() => Err(CoreError::Expired),
            Some(lock) => Ok(lock.clone()),
        }
    }

    pub async fn get_by_target(&self, target: &SemanticTarget) -> Option<SemanticLock> {
        let inner = self.inner.read().await;
        let id = inner.by_target.get(&target.id())?;
        inner.by_id.get(id).filter(|lock| !lock.is_expired()).cloned()
    }

    /// All non-expired locks whose target overlaps `target`.
    pub async fn find_conflicts(&self, target: &SemanticTarget) -> Vec<SemanticLock> {
        let inner = self.inner.read().await;
        inner
            .by_id
            .values()
            .filter(|lock| !lock.is_expired() && lock.target.overlaps(target))
            .cloned()
            .collect()
    }

    pub async fn remove(&self, id: &str) -> CoreResult<SemanticLock> {
        let mut inner = self.inner.write().await;
        let lock = inner.by_id.remove(id).ok_or_else(|| CoreError::NotFound(id.to_string()))?;
        inner.by_target.remove(&lock.target.id());
        push_history(
            &mut inner.history,
            inner.history_capacity,
            HistoryEntry {
                timestamp: crate::utils::now(),
                action: LockAction::Released,
                lock_id: lock.id.clone(),
                holder: lock.holder_id.clone(),
                target: lock.target.clone(),
            },
        );
        Ok(lock)
    }

    /// Replaces an existing lock in place (used to record a renewal or a
    /// remote `lock_acquired` update without touching history twice).
    pub async fn replace(&self, lock: SemanticLock) {
        let mut inner = self.inner.write().await;
        inner.by_target.insert(lock.target.id(), lock.id.clone());
        inner.by_id.insert(lock.id.clone(), lock);
    }

    pub async fn list(&self) -> Vec<SemanticLock> {
        let inner = self.inner.read().await;
        inner.by_id.values().filter(|lock| !lock.is_expired()).cloned().collect()
    }

    pub async fn list_by_holder(&self, holder_id: &str) -> Vec<SemanticLock> {
        let inner = self.inner.read().await;
        inner
            .by_id
            .values()
            .filter(|lock| !lock.is_expired() && lock.holder_id == holder_id)
            .cloned()
            .collect()
    }

    /// Newest-first history, up to `history_capacity` entries.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        let inner = self.inner.read().await;
        inner.history.iter().rev().cloned().collect()
    }

    /// Removes every expired lock, appending an `expired` history entry for
    /// each. Runs under the same write lock discipline as the public API,
    /// so it never starves readers beyond one write-lock hold.
    pub async fn sweep(&self) -> usize {
        let mut inner = self.inner.write().await;
        let expired_ids: Vec<String> = inner
            .by_id
            .values()
            .filter(|lock| lock.is_expired())
            .map(|lock| lock.id.clone())
            .collect();

        for id in &expired_ids {
            if let Some(lock) = inner.by_id.remove(id) {
                inner.by_target.remove(&lock.target.id());
                push_history(
                    &mut inner.history,
                    inner.history_capacity,
                    HistoryEntry {
                        timestamp: crate::utils::now(),
                        action: LockAction::Expired,
                        lock_id: lock.id.clone(),
                        holder: lock.holder_id.clone(),
                        target: lock.target.clone(),
                    },
                );
            }
        }
        expired_ids.len()
    }

    /// Appends a `conflict` history entry without mutating the lock map;
    /// used by the negotiator when it records a denied/escalated attempt.
    pub async fn record_conflict(&self, lock_id: &str, holder: &str, target: &SemanticTarget) {
        let mut inner = self.inner.write().await;
        push_history(
            &mut inner.history,
            inner.history_capacity,
            HistoryEntry {
                timestamp: crate::utils::now(),
                action: LockAction::Conflict,
                lock_id: lock_id.to_string(),
                holder: holder.to_string(),
                target: target.clone(),
            },
        );
    }

    /// Spawns the expiry sweeper. Stops cleanly when `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let n = store.sweep().await;
                        if n > 0 {
                            log::trace!("lock store sweeper removed {n} expired lock(s)");
                        }
                    }
                }
            }
        })
    }
}

impl Default for LockStore {
    fn default() -> Self {
        Self::new()
    }
}

fn push_history(history: &mut VecDeque<HistoryEntry>, capacity: usize, entry: HistoryEntry) {
    history.push_back(entry);
    while history.len() > capacity {
        history.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::TargetKind;
    use crate::utils::{now, seconds};

    fn lock(id: &str, start: u32, end: u32, holder: &str, token: u64) -> SemanticLock {
        SemanticLock {
            id: id.to_string(),
            target: SemanticTarget::new(TargetKind::Function, "a.go", "f", start, end, None).unwrap(),
            holder_id: holder.to_string(),
            holder_name: holder.to_string(),
            intention: "edit".to_string(),
            fencing_token: token,
            acquired_at: now(),
            expires_at: now().plus(seconds(30)),
            renew_count: 0,
        }
    }

    #[tokio::test]
    async fn at_most_one_non_expired_lock_per_target() {
        let store = LockStore::new();
        store.add(lock("l1", 1, 10, "n1", 1)).await.unwrap();
        let err = store.add(lock("l2", 1, 10, "n2", 2)).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn released_lock_never_reappears_in_list() {
        let store = LockStore::new();
        store.add(lock("l1", 1, 10, "n1", 1)).await.unwrap();
        store.remove("l1").await.unwrap();
        assert!(store.list().await.is_empty());
        assert_eq!(store.history().await.len(), 2);
    }

    #[tokio::test]
    async fn find_conflicts_only_returns_overlapping_non_expired() {
        let store = LockStore::new();
        store.add(lock("l1", 1, 10, "n1", 1)).await.unwrap();
        let target = SemanticTarget::new(TargetKind::Function, "a.go", "g", 5, 15, None).unwrap();
        let conflicts = store.find_conflicts(&target).await;
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, "l1");
    }

    #[tokio::test]
    async fn sweep_removes_expired_and_records_history() {
        let store = LockStore::new();
        let mut expired = lock("l1", 1, 10, "n1", 1);
        expired.expires_at = now() - seconds(1);
        store.add(expired).await.unwrap();

        let removed = store.sweep().await;
        assert_eq!(removed, 1);
        assert!(store.list().await.is_empty());
        let history = store.history().await;
        assert!(matches!(history[0].action, LockAction::Expired));
    }

    #[tokio::test]
    async fn history_ring_is_bounded_and_newest_first() {
        let store = LockStore::with_history_capacity(2);
        store.add(lock("l1", 1, 10, "n1", 1)).await.unwrap();
        store.remove("l1").await.unwrap();
        store.add(lock("l2", 20, 30, "n1", 2)).await.unwrap();

        let history = store.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].lock_id, "l2");
    }
}
