use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::SyncManager;
use crate::delta::Delta;
use crate::event::{ContextData, Event, EventKind};
use crate::pubsub::PubSub;
use crate::vector_clock::{compare_maps, CausalOrder};
use crate::wire::WireMessage;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecoveryReport {
    pub replayed: u32,
    pub merged: u32,
    pub conflicts_found: u32,
    pub conflicts_resolved: u32,
    pub conflicts_escalated: u32,
}

/// Post-partition delta replay (spec §4.8). Callers gather one
/// `sync_response` per peer reachable again after a heal is detected and
/// pass them in; this resolves concurrent edits to the same file with the
/// timestamp-then-source-id tiebreak (spec §9 Open Question: the source's
/// two recovery flows disagree on timestamp-ordered vs. causal-order; this
/// spec picks timestamp-then-source-id) and replays the rest through the
/// Sync Manager.
pub struct ContextRecovery {
    manager: Arc<SyncManager>,
    events: Arc<PubSub<Event>>,
}

impl ContextRecovery {
    pub fn new(manager: Arc<SyncManager>, events: Arc<PubSub<Event>>) -> Self {
        ContextRecovery { manager, events }
    }

    pub async fn recover(&self, responses: Vec<WireMessage>) -> ContextRecoveryReport {
        let mut report = ContextRecoveryReport::default();

        let mut deltas: Vec<Delta> = responses
            .into_iter()
            .filter_map(|message| match message {
                WireMessage::SyncResponse { deltas, .. } => Some(deltas),
                _ => None,
            })
            .flatten()
            .collect();
        deltas.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.source_id.cmp(&b.source_id)));

        let mut winners: HashMap<String, Delta> = HashMap::new();
        let mut unconditional: Vec<Delta> = Vec::new();

        for delta in deltas {
            let Some(file_path) = delta.file_path().map(str::to_string) else {
                unconditional.push(delta);
                continue;
            };

            match winners.remove(&file_path) {
                None => {
                    winners.insert(file_path, delta);
                }
                Some(incumbent) => {
                    if compare_maps(&incumbent.vector_clock, &delta.vector_clock) != CausalOrder::Concurrent {
                        // Causally ordered: the later one already reflects the
                        // earlier one, no real conflict to resolve.
                        let later = if delta.timestamp >= incumbent.timestamp { delta } else { incumbent };
                        winners.insert(file_path, later);
                        continue;
                    }

                    report.conflicts_found += 1;
                    match resolve_tie(incumbent, delta) {
                        Some((winner, file_path_owned)) => {
                            report.conflicts_resolved += 1;
                            winners.insert(file_path_owned, winner);
                        }
                        None => {
                            report.conflicts_escalated += 1;
                            self.escalate(&file_path).await;
                        }
                    }
                }
            }
        }

        for delta in unconditional.into_iter().chain(winners.into_values()) {
            if self.manager.handle_remote_delta(delta).await {
                report.replayed += 1;
            } else {
                report.merged += 1;
            }
        }

        report
    }

    async fn escalate(&self, file_path: &str) {
        log::warn!("context recovery: full tie on {file_path}, escalating to human resolution");
        self.events.publish(Event::new(
            EventKind::ContextUpdated,
            ContextData {
                file_path: file_path.to_string(),
                agent_id: None,
                content: Some("concurrent edits could not be reconciled automatically".to_string()),
            },
        ));
    }
}

/// Later timestamp wins; a timestamp tie goes to the lexicographically
/// smaller `source_id`; a full tie escalates (spec §4.8).
fn resolve_tie(a: Delta, b: Delta) -> Option<(Delta, String)> {
    let file_path = a.file_path().map(str::to_string)?;
    let winner = match a.timestamp.cmp(&b.timestamp) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal => match a.source_id.cmp(&b.source_id) {
            Ordering::Less => a,
            Ordering::Greater => b,
            Ordering::Equal => return None,
        },
    };
    Some((winner, file_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{DeltaLog, DeltaPayload, FileChangePayload};
    use crate::registry::PeerRegistry;
    use crate::sync::manager::LoggingConflictHandler;
    use crate::transport::LoopbackTransport;
    use crate::utils::DateTimeExt;
    use crate::vector_clock::{ClockSnapshot, VectorClock};

    fn file_delta(source: &str, id_seed: u64, clock: ClockSnapshot) -> Delta {
        let mut delta = Delta::new(
            source,
            source,
            clock,
            DeltaPayload::FileChange(FileChangePayload {
                file_path: "a.go".to_string(),
                file_hash: Some(format!("h{id_seed}")),
                file_diff: None,
            }),
        );
        delta.id = format!("delta-{source}-{id_seed}");
        delta
    }

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

    fn sync_response(deltas: Vec<Delta>) -> WireMessage {
        WireMessage::SyncResponse {
            responder_id: "peer".to_string(),
            deltas,
            current_clock: ClockSnapshot::new(),
            timestamp: crate::utils::now(),
        }
    }

    #[tokio::test]
    async fn non_conflicting_deltas_are_all_replayed() {
        let manager = manager("n1");
        let recovery = ContextRecovery::new(manager.clone(), Arc::new(PubSub::new(16)));

        let mut clock_a = ClockSnapshot::new();
        clock_a.insert("n2".to_string(), 1);
        let mut clock_b = ClockSnapshot::new();
        clock_b.insert("n3".to_string(), 1);

        let responses = vec![sync_response(vec![
            file_delta("n2", 1, clock_a),
            Delta::new(
                "n3",
                "n3",
                clock_b,
                DeltaPayload::AgentStatus(crate::delta::AgentStatusPayload {
                    agent_id: "n3".to_string(),
                    state: "online".to_string(),
                }),
            ),
        ])];

        let report = recovery.recover(responses).await;
        assert_eq!(report.replayed, 2);
        assert_eq!(report.conflicts_found, 0);
    }

    #[tokio::test]
    async fn concurrent_edits_to_same_file_resolve_by_timestamp() {
        let manager = manager("n1");
        let recovery = ContextRecovery::new(manager.clone(), Arc::new(PubSub::new(16)));

        let mut clock_a = ClockSnapshot::new();
        clock_a.insert("n2".to_string(), 1);
        let mut clock_b = ClockSnapshot::new();
        clock_b.insert("n3".to_string(), 1);

        let mut older = file_delta("n2", 1, clock_a);
        let mut newer = file_delta("n3", 2, clock_b);
        older.timestamp = crate::utils::now();
        newer.timestamp = older.timestamp.plus(crate::utils::seconds(5));

        let responses = vec![sync_response(vec![older, newer.clone()])];
        let report = recovery.recover(responses).await;

        assert_eq!(report.conflicts_found, 1);
        assert_eq!(report.conflicts_resolved, 1);
        assert_eq!(report.conflicts_escalated, 0);
        assert_eq!(report.replayed, 1);
        let landed = manager.log().get(&newer.id).await;
        assert!(landed.is_some());
    }

    #[tokio::test]
    async fn full_tie_escalates() {
        let manager = manager("n1");
        let recovery = ContextRecovery::new(manager.clone(), Arc::new(PubSub::new(16)));

        let mut clock_a = ClockSnapshot::new();
        clock_a.insert("n2".to_string(), 1);
        let mut clock_b = ClockSnapshot::new();
        clock_b.insert("n3".to_string(), 1);

        let timestamp = crate::utils::now();
        let mut a = file_delta("same-source", 1, clock_a);
        let mut b = file_delta("same-source", 2, clock_b);
        a.timestamp = timestamp;
        b.timestamp = timestamp;

        let report = recovery.recover(vec![sync_response(vec![a, b])]).await;
        assert_eq!(report.conflicts_escalated, 1);
        assert_eq!(report.conflicts_resolved, 0);
    }

    #[tokio::test]
    async fn already_known_deltas_count_as_merged() {
        let manager = manager("n1");
        let recovery = ContextRecovery::new(manager.clone(), Arc::new(PubSub::new(16)));

        let mut clock = ClockSnapshot::new();
        clock.insert("n2".to_string(), 1);
        let delta = file_delta("n2", 1, clock);
        manager.handle_remote_delta(delta.clone()).await;

        let report = recovery.recover(vec![sync_response(vec![delta])]).await;
        assert_eq!(report.merged, 1);
        assert_eq!(report.replayed, 0);
    }
}
