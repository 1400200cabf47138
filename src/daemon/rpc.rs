//! Request/response wire shapes for the RPC socket (spec §4.9). Framing is
//! newline-delimited JSON, matching [`crate::wire::WireMessage`] and
//! [`crate::event::Event`] elsewhere in the crate.

use serde::{Deserialize, Serialize};

use crate::lock::SemanticLock;
use crate::registry::AgentState;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub verb: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(result: impl Serialize) -> Self {
        RpcResponse {
            ok: true,
            result: serde_json::to_value(result).ok(),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        RpcResponse {
            ok: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResult {
    pub node_id: String,
    pub node_name: String,
    pub cluster_id: Option<String>,
    pub uptime_secs: u64,
    pub lock_count: usize,
    pub peer_count: usize,
    pub agent_count: usize,
    pub delta_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitParams {
    pub project_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResult {
    pub cluster_id: String,
    pub invite_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinParams {
    pub token: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    pub success: bool,
    pub cluster_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAcquireParams {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub intention: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAcquireResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockReleaseParams {
    pub lock_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockReleaseResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockListResult {
    pub locks: Vec<SemanticLock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub id: String,
    pub addrs: Vec<String>,
    pub latency_ms: Option<u64>,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeersListResult {
    pub peers: Vec<PeerSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentsListResult {
    pub agents: Vec<AgentState>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedParams {
    #[allow(dead_code)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[allow(dead_code)]
    pub query: String,
    #[allow(dead_code)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextWatchParams {
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextWatchResult {
    pub registered: bool,
}
