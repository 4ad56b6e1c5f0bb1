//! Tool client: JSON-RPC over stdio for assistant tool servers.
//!
//! This module handles:
//! - Spawning tool server child processes, locally or over ssh
//! - Line-delimited JSON-RPC 2.0 framing with id correlation
//! - Serializing calls so one domain never has two requests in flight
//! - Unwrapping the `content[0].text` result envelope
//! - Server lifecycle (start, restart with backoff, graceful shutdown)
//!
//! Domain facades in [`crate::domains`] sit on top of [`ToolClient`].

pub mod client;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod lifecycle;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use client::{ClientOptions, ToolCall, ToolClient};
pub use config::{ServerConfig, ToolServersConfig};
pub use errors::ToolError;
pub use lifecycle::RestartPolicy;
pub use transport::{LocalCommand, ProcessTransport, SshTarget, Transport, TransportSpec};
pub use types::{ServerState, ToolInvocation};
