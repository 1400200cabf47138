use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use super::Delta;
use crate::vector_clock::{compare_maps, CausalOrder, ClockSnapshot};

struct Inner {
    order: VecDeque<String>,
    by_id: HashMap<String, Delta>,
    by_source: HashMap<String, VecDeque<String>>,
}

/// Bounded, indexed append-only log (spec §3.5, §4.6). Appending is O(1)
/// amortized; eviction on overflow is O(k) where k is the evicted entry's
/// source list length, since only that list needs to drop one id.
pub struct DeltaLog {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl DeltaLog {
    pub fn new(capacity: usize) -> Self {
        DeltaLog {
            capacity,
            inner: RwLock::new(Inner {
                order: VecDeque::with_capacity(capacity),
                by_id: HashMap::new(),
                by_source: HashMap::new(),
            }),
        }
    }

    /// Appends a delta. Returns `false` without mutating anything if `id`
    /// is already present (re-delivery is idempotent).
    pub async fn append(&self, delta: Delta) -> bool {
        let mut inner = self.inner.write().await;
        if inner.by_id.contains_key(&delta.id) {
            return false;
        }

        let source_id = delta.source_id.clone();
        let id = delta.id.clone();
        inner.order.push_back(id.clone());
        inner.by_source.entry(source_id).or_default().push_back(id.clone());
        inner.by_id.insert(id, delta);

        if inner.order.len() > self.capacity {
            if let Some(evicted_id) = inner.order.pop_front() {
                if let Some(evicted) = inner.by_id.remove(&evicted_id) {
                    if let Some(list) = inner.by_source.get_mut(&evicted.source_id) {
                        list.retain(|id| id != &evicted_id);
                        if list.is_empty() {
                            inner.by_source.remove(&evicted.source_id);
                        }
                    }
                }
            }
        }
        true
    }

    pub async fn get(&self, id: &str) -> Option<Delta> {
        self.inner.read().await.by_id.get(id).cloned()
    }

    /// Every delta whose clock is `After` or `Concurrent` with `vc`, in
    /// insertion order.
    pub async fn get_since(&self, vc: &ClockSnapshot) -> Vec<Delta> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|d| matches!(compare_maps(&d.vector_clock, vc), CausalOrder::After | CausalOrder::Concurrent))
            .cloned()
            .collect()
    }

    pub async fn get_recent(&self, n: usize) -> Vec<Delta> {
        let inner = self.inner.read().await;
        let len = inner.order.len();
        let skip = len.saturating_sub(n);
        inner
            .order
            .iter()
            .skip(skip)
            .filter_map(|id| inner.by_id.get(id))
            .cloned()
            .collect()
    }

    pub async fn get_by_source(&self, source_id: &str) -> Vec<Delta> {
        let inner = self.inner.read().await;
        inner
            .by_source
            .get(source_id)
            .map(|ids| ids.iter().filter_map(|id| inner.by_id.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub async fn size(&self) -> usize {
        self.inner.read().await.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{DeltaPayload, LockReleasedPayload};

    fn delta(source: &str, id_seed: u64) -> Delta {
        let mut clock = ClockSnapshot::new();
        clock.insert(source.to_string(), id_seed);
        let mut delta = Delta::new(
            source,
            source,
            clock,
            DeltaPayload::LockReleased(LockReleasedPayload {
                lock_id: format!("lock-{id_seed}"),
            }),
        );
        // Force distinct ids even when timestamps collide within the same tick.
        delta.id = format!("delta-{source}-{id_seed}");
        delta
    }

    #[tokio::test]
    async fn append_then_append_is_idempotent() {
        let log = DeltaLog::new(10);
        let d = delta("n1", 1);
        assert!(log.append(d.clone()).await);
        assert!(!log.append(d).await);
        assert_eq!(log.size().await, 1);
    }

    #[tokio::test]
    async fn bounded_growth_evicts_oldest() {
        let log = DeltaLog::new(1000);
        for i in 0..1500u64 {
            log.append(delta("n1", i)).await;
        }
        assert_eq!(log.size().await, 1000);
        assert!(log.get("delta-n1-0").await.is_none());
        assert!(log.get("delta-n1-1499").await.is_some());
    }

    #[tokio::test]
    async fn eviction_cleans_up_empty_source_lists() {
        let log = DeltaLog::new(1);
        log.append(delta("n1", 0)).await;
        log.append(delta("n2", 1)).await;
        assert!(log.get_by_source("n1").await.is_empty());
        assert_eq!(log.get_by_source("n2").await.len(), 1);
    }

    #[tokio::test]
    async fn get_since_includes_after_and_concurrent() {
        let log = DeltaLog::new(10);
        log.append(delta("n1", 5)).await;
        log.append(delta("n2", 1)).await;

        let mut baseline = ClockSnapshot::new();
        baseline.insert("n1".to_string(), 3);
        let since = log.get_since(&baseline).await;
        assert_eq!(since.len(), 2);
    }
}
