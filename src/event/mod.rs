//! Event types published on the daemon's event stream (spec §4.9, §6.4).
//! Each wire record is `{type, timestamp, data?}`; `data`'s required
//! fields depend on `type`, so the payload is a typed struct per kind
//! serialized into the generic `data` slot rather than one record with
//! every field optional.

use serde::{Deserialize, Serialize};

use crate::utils::{now, DateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    LockAcquired,
    LockReleased,
    LockConflict,
    LockExpired,
    AgentJoined,
    AgentLeft,
    ContextUpdated,
    ContextSynced,
    PeerConnected,
    PeerDisconnected,
    DaemonReady,
    DaemonShutdown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LockAcquired => "lock.acquired",
            EventKind::LockReleased => "lock.released",
            EventKind::LockConflict => "lock.conflict",
            EventKind::LockExpired => "lock.expired",
            EventKind::AgentJoined => "agent.joined",
            EventKind::AgentLeft => "agent.left",
            EventKind::ContextUpdated => "context.updated",
            EventKind::ContextSynced => "context.synced",
            EventKind::PeerConnected => "peer.connected",
            EventKind::PeerDisconnected => "peer.disconnected",
            EventKind::DaemonReady => "daemon.ready",
            EventKind::DaemonShutdown => "daemon.shutdown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAcquiredData {
    pub lock_id: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub agent_id: String,
    pub intention: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockIdData {
    pub lock_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockConflictData {
    pub file_path: String,
    pub holder_id: String,
    pub requester_id: String,
    pub intention: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentData {
    pub agent_id: String,
    pub name: String,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextData {
    pub file_path: String,
    pub agent_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerData {
    pub peer_id: String,
    pub addr: Option<String>,
}

/// One record on the event stream: `{type, timestamp, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(kind: EventKind, data: impl Serialize) -> Self {
        Event {
            kind: kind.as_str().to_string(),
            timestamp: now(),
            data: serde_json::to_value(data).ok(),
        }
    }

    pub fn without_data(kind: EventKind) -> Self {
        Event {
            kind: kind.as_str().to_string(),
            timestamp: now(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_type_and_data() {
        let event = Event::new(
            EventKind::LockConflict,
            LockConflictData {
                file_path: "a.go".to_string(),
                holder_id: "n1".to_string(),
                requester_id: "n2".to_string(),
                intention: "edit".to_string(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"lock.conflict\""));
        assert!(json.contains("\"holderId\":\"n1\""));
    }

    #[test]
    fn events_without_data_omit_the_field() {
        let event = Event::without_data(EventKind::DaemonReady);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"data\""));
    }
}
