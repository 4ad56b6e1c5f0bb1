//! Tool client error types.

use thiserror::Error;

/// Errors that can occur while talking to a tool server.
///
/// None of these are fatal to the caller: domain facades turn them into a
/// "no answer" sentinel and handlers turn that into an apology.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The server process could not be started.
    #[error("failed to spawn server '{server}': {reason}")]
    SpawnFailed { server: String, reason: String },

    /// An operation was attempted before start or after stop.
    #[error("server '{server}' is not connected")]
    NotConnected { server: String },

    /// A pipe read or write failed.
    #[error("i/o error on server '{server}': {reason}")]
    Io { server: String, reason: String },

    /// The server closed its stdout.
    #[error("server '{server}' closed its output stream")]
    Eof { server: String },

    /// The server process exited while it was expected to be running.
    #[error("server '{server}' crashed: {reason}")]
    ServerCrashed { server: String, reason: String },

    /// No reply arrived before the call deadline.
    #[error("call to server '{server}' timed out after {timeout_ms}ms")]
    Timeout { server: String, timeout_ms: u64 },

    /// The reply line is not a JSON-RPC response.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// The server answered with a JSON-RPC error object.
    #[error("remote error [{code}]: {message}")]
    Remote {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The result is present but is not the expected `content[0].text` envelope.
    #[error("unexpected result shape: {reason}")]
    Shape { reason: String },

    /// The response is neither a result nor an error.
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    /// Tool arguments could not be serialized.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The server is restarting or has been given up on.
    #[error("server '{server}' is unavailable: {reason}")]
    Unavailable { server: String, reason: String },

    /// All restart attempts failed.
    #[error("server '{server}' failed after {attempts} restart attempts")]
    RestartExhausted { server: String, attempts: u32 },

    /// Bad or missing configuration.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl ToolError {
    /// Whether this error means the child process is gone or its pipes are broken.
    pub fn is_crash(&self) -> bool {
        matches!(
            self,
            ToolError::Io { .. } | ToolError::Eof { .. } | ToolError::ServerCrashed { .. }
        )
    }

    /// Whether retrying later has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Timeout { .. } | ToolError::Unavailable { .. })
    }

    /// The JSON-RPC error code, if the server reported one.
    pub fn remote_code(&self) -> Option<i32> {
        match self {
            ToolError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for ToolError {
    fn from(e: serde_yaml::Error) -> Self {
        ToolError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        }
    }
}
