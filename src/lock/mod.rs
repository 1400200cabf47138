//! Semantic lock type, fencing token source, and history record (spec
//! §3.3, §3.6). The negotiator, store and recovery pass live in their own
//! submodules.

pub mod negotiator;
pub mod recovery;
pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use self::negotiator::{LockNegotiator, LockResult, NegotiationSession, NegotiationState, PendingStatus};
pub use self::recovery::{LockRecovery, RecoveryReport};
pub use self::store::LockStore;
use crate::semantic::SemanticTarget;
use crate::utils::{minutes, now, random_hex_id, seconds, DateTime};

pub const DEFAULT_LEASE: Duration = seconds(30);
pub const MAX_LEASE: Duration = minutes(5);
pub const MAX_RENEWALS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticLock {
    pub id: String,
    pub target: SemanticTarget,
    pub holder_id: String,
    pub holder_name: String,
    pub intention: String,
    pub fencing_token: u64,
    pub acquired_at: DateTime,
    pub expires_at: DateTime,
    pub renew_count: u32,
}

impl SemanticLock {
    pub fn is_expired(&self) -> bool {
        now() > self.expires_at
    }
}

pub fn new_lock_id() -> String {
    random_hex_id("lock", 96)
}

/// The fencing-token source: a single process-global monotonic counter,
/// constructed once at daemon start and handed to every component that
/// mints locks by reference. Not a static — no implicit singleton.
#[derive(Debug, Default)]
pub struct FencingCounter(AtomicU64);

impl FencingCounter {
    pub fn new() -> Self {
        FencingCounter(AtomicU64::new(0))
    }

    /// Returns the next token; tokens start at 1 and are strictly
    /// increasing for the lifetime of this counter.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockAction {
    Acquired,
    Released,
    Expired,
    Conflict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime,
    pub action: LockAction,
    pub lock_id: String,
    pub holder: String,
    pub target: SemanticTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fencing_tokens_are_strictly_increasing() {
        let counter = FencingCounter::new();
        let a = counter.next();
        let b = counter.next();
        let c = counter.next();
        assert!(a < b);
        assert!(b < c);
    }
}
