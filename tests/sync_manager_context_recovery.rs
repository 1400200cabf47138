//! Cross-component scenario: sync manager + delta log + context recovery.

use std::sync::Arc;

use meshlock::delta::{Delta, DeltaLog, DeltaPayload, FileChangePayload};
use meshlock::pubsub::PubSub;
use meshlock::registry::PeerRegistry;
use meshlock::sync::{ContextRecovery, LoggingConflictHandler, SyncManager};
use meshlock::transport::LoopbackTransport;
use meshlock::vector_clock::VectorClock;
use meshlock::wire::WireMessage;

fn manager(node: &str) -> Arc<SyncManager> {
    let events = Arc::new(PubSub::new(64));
    SyncManager::new(
        node,
        node,
        Arc::new(VectorClock::new()),
        Arc::new(DeltaLog::new(1000)),
        Arc::new(PeerRegistry::new(events.clone())),
        LoopbackTransport::new(node),
        events,
        Arc::new(LoggingConflictHandler),
    )
}

fn file_change(path: &str) -> FileChangePayload {
    FileChangePayload {
        file_path: path.to_string(),
        file_hash: None,
        file_diff: None,
    }
}

#[tokio::test]
async fn local_change_becomes_a_delta_that_a_remote_peer_can_ingest() {
    let a = manager("n1");
    let delta = a.handle_file_change(file_change("src/lib.rs")).await;
    assert_eq!(a.log().size().await, 1);

    let b = manager("n2");
    let applied = b.handle_remote_delta(delta.clone()).await;
    assert!(applied);
    assert_eq!(b.log().size().await, 1);

    // Re-delivering the same delta is a no-op (spec invariant: idempotent ingest).
    let applied_again = b.handle_remote_delta(delta).await;
    assert!(!applied_again);
    assert_eq!(b.log().size().await, 1);
}

#[tokio::test]
async fn context_recovery_replays_sync_responses_and_dedupes_known_deltas() {
    let node = manager("n1");
    let events = Arc::new(PubSub::new(64));
    let recovery = ContextRecovery::new(node.clone(), events);

    let known = node.handle_file_change(file_change("a.rs")).await;

    let clock = VectorClock::new();
    clock.increment("n2");
    let fresh = Delta::new(
        "n2",
        "n2",
        clock.snapshot(),
        DeltaPayload::FileChange(file_change("b.rs")),
    );

    let responses = vec![WireMessage::SyncResponse {
        responder_id: "n2".to_string(),
        deltas: vec![known, fresh],
        current_clock: clock.snapshot(),
        timestamp: meshlock::utils::now(),
    }];

    let report = recovery.recover(responses).await;
    assert_eq!(report.merged, 1);
    assert_eq!(report.replayed, 1);
    assert_eq!(node.log().size().await, 2);
}
