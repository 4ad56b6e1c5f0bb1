//! Shared types for the tool client.
//!
//! JSON-RPC 2.0 message types plus the per-call and per-server state the
//! rest of the module passes around.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// Method used for every tool invocation.
pub const TOOLS_CALL_METHOD: &str = "tools/call";

/// JSON-RPC 2.0 request message.
///
/// Field order matters: it is the order the fields appear on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: ToolCallParams,
    pub id: u64,
}

impl JsonRpcRequest {
    /// Create a `tools/call` request.
    pub fn tools_call(id: u64, tool_name: &str, arguments: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: TOOLS_CALL_METHOD.to_string(),
            params: ToolCallParams {
                name: tool_name.to_string(),
                arguments,
            },
            id,
        }
    }
}

/// `params` of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Whether this response answers the request with the given id.
    ///
    /// A missing or null id is accepted: servers send that when they could not
    /// parse the request, and the reply still belongs to the in-flight call.
    pub fn answers(&self, request_id: u64) -> bool {
        match &self.id {
            None | Some(serde_json::Value::Null) => true,
            Some(id) => id.as_u64() == Some(request_id),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

// ─── Calls ──────────────────────────────────────────────────────────────────

/// One tool call, built per request and never persisted.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(tool_name: &str, arguments: serde_json::Value, timeout: Duration) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            arguments,
            timeout,
        }
    }
}

// ─── States ─────────────────────────────────────────────────────────────────

/// Connection state of a single transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    NotStarted,
    Running,
    Stopped,
}

/// Supervisor state for one tool domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    NotStarted,
    Starting,
    Running,
    /// Child crashed; a replacement is being spawned with backoff.
    Restarting,
    Stopping,
    Stopped,
    /// Permanently unavailable for the rest of the process lifetime.
    Failed,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::NotStarted => "not_started",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Restarting => "restarting",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Standard Error Codes ───────────────────────────────────────────────────


// ─── Tests ──────────────────────────────────────────────────────────────────
