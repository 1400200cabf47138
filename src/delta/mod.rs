//! Tagged causal record of a change, and the bounded indexed log that
//! stores them (spec §3.4, §3.5, §4.6).

mod log;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use self::log::DeltaLog;
use crate::utils::{now, xx_hash, DateTime, DateTimeFormatExt};
use crate::vector_clock::ClockSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SymbolChange {
    Add { symbol: String, after_hash: String },
    Remove { symbol: String, before_hash: String },
    Modify { symbol: String, before_hash: String, after_hash: String },
    Move { symbol: String, before_hash: String, after_hash: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangePayload {
    pub file_path: String,
    pub file_hash: Option<String>,
    pub file_diff: Option<Vec<SymbolChange>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAcquiredPayload {
    pub lock_id: String,
    pub target_desc: String,
    pub intention: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReleasedPayload {
    pub lock_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusPayload {
    pub agent_id: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPayload {
    pub custom_type: String,
    pub custom_data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaPayload {
    FileChange(FileChangePayload),
    LockAcquired(LockAcquiredPayload),
    LockReleased(LockReleasedPayload),
    AgentStatus(AgentStatusPayload),
    Custom(CustomPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub id: String,
    pub source_id: String,
    pub source_name: String,
    pub vector_clock: ClockSnapshot,
    pub timestamp: DateTime,
    #[serde(flatten)]
    pub payload: DeltaPayload,
}

impl Delta {
    pub fn new(
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        vector_clock: ClockSnapshot,
        payload: DeltaPayload,
    ) -> Self {
        let source_id = source_id.into();
        let timestamp = now();
        let id = delta_id(&source_id, timestamp);
        Delta {
            id,
            source_id,
            source_name: source_name.into(),
            vector_clock,
            timestamp,
            payload,
        }
    }

    pub fn file_path(&self) -> Option<&str> {
        match &self.payload {
            DeltaPayload::FileChange(p) => Some(&p.file_path),
            _ => None,
        }
    }
}

/// Deterministic from `source_id || timestamp` so re-delivery of the same
/// logical event always produces the same id (spec §4.5, invariant 3).
pub fn delta_id(source_id: &str, timestamp: DateTime) -> String {
    let input = format!("{source_id}{}", timestamp.rfc3339_nano());
    let hash = xx_hash(input.as_bytes());
    format!("delta-{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_deterministic_for_same_source_and_timestamp() {
        let timestamp = now();
        let a = delta_id("n1", timestamp);
        let b = delta_id("n1", timestamp);
        assert_eq!(a, b);
        assert!(a.starts_with("delta-"));
    }

    #[test]
    fn id_differs_across_sources() {
        let timestamp = now();
        assert_ne!(delta_id("n1", timestamp), delta_id("n2", timestamp));
    }
}
