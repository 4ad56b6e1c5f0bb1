//! Tool client: the shared, serialized entry point for one tool server.
//!
//! Every clone of a [`ToolClient`] shares one supervisor behind a FIFO
//! `tokio::sync::Mutex`, so calls to a domain run strictly one at a time
//! while different domains proceed in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use super::envelope::unwrap_result;
use super::errors::ToolError;
use super::lifecycle::{RestartPolicy, Supervisor, DEFAULT_GREETING_TIMEOUT};
use super::transport::{ProcessTransport, Transport, TransportSpec};
use super::types::{ServerState, ToolInvocation};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Call timeout when neither the config nor the domain supplies one.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Typed Calls ─────────────────────────────────────────────────────────────

/// Binds an argument struct to a tool name and the shape of its answer.
///
/// Implementations are normally generated with `tool_schema!`.
pub trait ToolCall: Serialize + Send + Sync {
    /// Tool name as sent in `params.name`.
    const NAME: &'static str;

    /// Decoded payload of a successful call.
    type Output: DeserializeOwned + Send;
}

// ─── Options ─────────────────────────────────────────────────────────────────

/// Per-client tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub call_timeout: Duration,
    pub greeting_timeout: Duration,
    pub restart: RestartPolicy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            greeting_timeout: DEFAULT_GREETING_TIMEOUT,
            restart: RestartPolicy::default(),
        }
    }
}

// ─── ToolClient ──────────────────────────────────────────────────────────────

/// Cloneable handle to one supervised tool server.
#[derive(Clone)]
pub struct ToolClient {
    name: Arc<str>,
    supervisor: Arc<Mutex<Supervisor>>,
    state: Arc<watch::Sender<ServerState>>,
    call_timeout: Duration,
    policy: RestartPolicy,
}

impl std::fmt::Debug for ToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolClient")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl ToolClient {
    /// Wrap an unstarted transport.
    pub fn new(name: &str, transport: Box<dyn Transport>, options: ClientOptions) -> Self {
        let (state, _) = watch::channel(ServerState::NotStarted);
        let state = Arc::new(state);
        let supervisor = Supervisor::new(
            name,
            transport,
            Arc::clone(&state),
            options.restart,
            options.greeting_timeout,
        );
        Self {
            name: Arc::from(name),
            supervisor: Arc::new(Mutex::new(supervisor)),
            state,
            call_timeout: options.call_timeout,
            policy: options.restart,
        }
    }

    /// Client for a child process described by `spec`.
    pub fn for_process(name: &str, spec: TransportSpec, options: ClientOptions) -> Self {
        Self::new(name, Box::new(ProcessTransport::new(name, spec)), options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start the server process and read its greeting.
    pub async fn start(&self) -> Result<(), ToolError> {
        self.supervisor.lock().await.start().await
    }

    /// Stop the server process. Waits for any in-flight call first.
    ///
    /// A pending background restart is cancelled rather than waited out.
    pub async fn stop(&self) {
        self.state.send_if_modified(|state| {
            if *state != ServerState::Restarting {
                return false;
            }
            *state = ServerState::Stopping;
            true
        });
        self.supervisor.lock().await.stop().await;
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Run `body` while holding the server exclusively.
    ///
    /// The lock is released on every exit path, including when the calling
    /// future is dropped.
    pub async fn with_exclusive_access<R, F>(&self, body: F) -> Result<R, ToolError>
    where
        F: for<'a> FnOnce(&'a mut Supervisor) -> BoxFuture<'a, Result<R, ToolError>>,
    {
        let mut supervisor = self.supervisor.lock().await;
        supervisor.ensure_ready()?;
        body(&mut *supervisor).await
    }

    /// Call a tool with the client's default timeout and return its payload.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        self.call_with(ToolInvocation::new(tool_name, arguments, self.call_timeout))
            .await
    }

    /// Call a tool and return the unwrapped payload.
    pub async fn call_with(&self, invocation: ToolInvocation) -> Result<serde_json::Value, ToolError> {
        match self.state() {
            ServerState::Restarting => return Err(self.unavailable("restart pending")),
            ServerState::Failed => return Err(self.unavailable("server has failed")),
            _ => {}
        }

        let tool_name = invocation.tool_name.clone();
        let start = Instant::now();
        let outcome = self
            .with_exclusive_access(move |supervisor| {
                Box::pin(async move { supervisor.exchange(&invocation).await })
            })
            .await
            .and_then(unwrap_result);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => {
                tracing::debug!(server = %self.name, tool = %tool_name, elapsed_ms, "tool call succeeded");
            }
            Err(e) if e.is_crash() => {
                tracing::warn!(server = %self.name, tool = %tool_name, error = %e, "tool server crashed");
                self.schedule_restart();
            }
            Err(e) => {
                tracing::debug!(server = %self.name, tool = %tool_name, elapsed_ms, error = %e, "tool call failed");
            }
        }
        outcome
    }

    /// Call a typed tool binding.
    pub async fn invoke<C: ToolCall>(&self, call: &C) -> Result<C::Output, ToolError> {
        let arguments = match serde_json::to_value(call) {
            Ok(serde_json::Value::Null) => serde_json::json!({}),
            Ok(value) => value,
            Err(e) => {
                return Err(ToolError::InvalidArguments {
                    tool: C::NAME.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let payload = self.call_tool(C::NAME, arguments).await?;
        serde_json::from_value(payload).map_err(|e| ToolError::Shape {
            reason: format!("unexpected payload from '{}': {e}", C::NAME),
        })
    }

    // ─── Restart ─────────────────────────────────────────────────────────

    /// Move a crashed server to `Restarting` and recover it in the background.
    ///
    /// Only the first caller to observe the crash wins; later ones see a
    /// state other than `Running` and leave it alone. With restarts disabled
    /// the server goes straight to `Failed`.
    fn schedule_restart(&self) {
        let disabled = self.policy.max_attempts == 0;
        let claimed = self.state.send_if_modified(|state| {
            if *state != ServerState::Running {
                return false;
            }
            *state = if disabled {
                ServerState::Failed
            } else {
                ServerState::Restarting
            };
            true
        });
        if !claimed {
            return;
        }

        if disabled {
            tracing::warn!(server = %self.name, "restarts disabled, marking server failed");
        }

        let supervisor = Arc::clone(&self.supervisor);
        let name = Arc::clone(&self.name);
        tokio::spawn(async move {
            let mut supervisor = supervisor.lock().await;
            if let Err(e) = supervisor.restart().await {
                tracing::error!(server = %name, error = %e, "tool server given up");
            }
        });
    }

    fn unavailable(&self, reason: &str) -> ToolError {
        ToolError::Unavailable {
            server: self.name.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::tool_client::testing::{
        error_line, result_line, Reply, ScriptedTransport, WireEvent,
    };

    fn options(call_timeout: Duration, restart: RestartPolicy) -> ClientOptions {
        ClientOptions {
            call_timeout,
            greeting_timeout: Duration::from_millis(50),
            restart,
        }
    }

    fn client(transport: ScriptedTransport, restart: RestartPolicy) -> ToolClient {
        ToolClient::new(
            "weather",
            Box::new(transport),
            options(Duration::from_secs(1), restart),
        )
    }

    async fn wait_for_state(client: &ToolClient, target: ServerState) {
        let mut rx = client.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
            .await
            .expect("state not reached in time")
            .expect("state channel closed");
    }

    #[derive(Serialize)]
    struct Echo {
        city: String,
    }

    #[derive(Debug, Deserialize)]
    struct Echoed {
        tool: String,
        arguments: serde_json::Value,
    }

    impl ToolCall for Echo {
        const NAME: &'static str = "get_weather";
        type Output = Echoed;
    }

    #[derive(Serialize)]
    struct Mismatched {
        city: String,
    }

    #[derive(Debug, Deserialize)]
    struct Forecast {
        #[allow(dead_code)]
        temperature: f64,
    }

    impl ToolCall for Mismatched {
        const NAME: &'static str = "get_weather";
        type Output = Forecast;
    }

    #[tokio::test]
    async fn test_call_before_start_is_not_connected() {
        let (transport, _handle) = ScriptedTransport::echo_payload();
        let client = client(transport, RestartPolicy::default());
        let err = client.call_tool("get_weather", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_invoke_decodes_typed_output() {
        let (transport, _handle) = ScriptedTransport::echo_payload();
        let client = client(transport, RestartPolicy::default());
        client.start().await.unwrap();

        let out = client
            .invoke(&Echo {
                city: "Moscow".into(),
            })
            .await
            .unwrap();
        assert_eq!(out.tool, "get_weather");
        assert_eq!(out.arguments, serde_json::json!({"city": "Moscow"}));
    }

    #[tokio::test]
    async fn test_invoke_output_mismatch_is_shape_error() {
        let (transport, _handle) = ScriptedTransport::echo_payload();
        let client = client(transport, RestartPolicy::default());
        client.start().await.unwrap();

        let err = client
            .invoke(&Mismatched {
                city: "Moscow".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Shape { .. }));
        assert_eq!(client.state(), ServerState::Running);
    }

    #[tokio::test]
    async fn test_remote_error_is_reported() {
        let (transport, _handle) = ScriptedTransport::new(|req| {
            vec![Reply::now(error_line(req.id, -32000, "tool not found"))]
        });
        let client = client(transport, RestartPolicy::default());
        client.start().await.unwrap();

        match client.call_tool("no_such_tool", serde_json::json!({})).await {
            Err(ToolError::Remote { code, message, .. }) => {
                assert_eq!(code, -32000);
                assert_eq!(message, "tool not found");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_then_next_call_discards_late_reply() {
        let (transport, handle) = ScriptedTransport::new(|req| {
            let delay = if req.id == 1 {
                Duration::from_millis(200)
            } else {
                Duration::ZERO
            };
            vec![Reply::after(
                delay,
                result_line(req.id, &serde_json::json!({"call": req.id})),
            )]
        });
        let client = ToolClient::new(
            "weather",
            Box::new(transport),
            options(Duration::from_millis(50), RestartPolicy::default()),
        );
        client.start().await.unwrap();

        let err = client.call_tool("get_weather", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_ms: 50, .. }));
        assert_eq!(client.state(), ServerState::Running);

        let payload = client
            .call_with(ToolInvocation::new(
                "get_weather",
                serde_json::json!({}),
                Duration::from_secs(2),
            ))
            .await
            .unwrap();
        assert_eq!(payload, serde_json::json!({"call": 2}));

        assert_eq!(
            handle.log(),
            vec![
                WireEvent::Write(1),
                WireEvent::Write(2),
                WireEvent::Read(Some(1)),
                WireEvent::Read(Some(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_calls_never_interleave() {
        let (transport, handle) = ScriptedTransport::new(|req| {
            vec![Reply::after(
                Duration::from_millis(5),
                result_line(req.id, &req.params.arguments),
            )]
        });
        let client = client(transport, RestartPolicy::default());
        client.start().await.unwrap();

        let calls = (0..8).map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let args = serde_json::json!({"city": format!("city-{i}")});
                let payload = client.call_tool("get_weather", args.clone()).await.unwrap();
                assert_eq!(payload, args);
            })
        });
        for joined in futures::future::join_all(calls).await {
            joined.unwrap();
        }

        let log = handle.log();
        assert_eq!(log.len(), 16);
        for pair in log.chunks(2) {
            match pair {
                [WireEvent::Write(w), WireEvent::Read(Some(r))] => assert_eq!(w, r),
                other => panic!("interleaved exchange: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_crash_restarts_in_background() {
        let (transport, handle) = ScriptedTransport::echo_payload();
        let policy = RestartPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        };
        let client = client(transport, policy);
        client.start().await.unwrap();

        handle.kill();
        let err = client.call_tool("get_weather", serde_json::json!({})).await.unwrap_err();
        assert!(err.is_crash());
        assert_eq!(client.state(), ServerState::Restarting);

        let err = client.call_tool("get_weather", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable { .. }));
        assert!(err.is_transient());

        wait_for_state(&client, ServerState::Running).await;
        assert_eq!(handle.start_count(), 2);
        let payload = client
            .call_tool("get_weather", serde_json::json!({"city": "Kazan"}))
            .await
            .unwrap();
        assert_eq!(payload["arguments"], serde_json::json!({"city": "Kazan"}));
    }

    #[tokio::test]
    async fn test_crash_with_restarts_disabled_fails() {
        let (transport, handle) = ScriptedTransport::echo_payload();
        let client = client(transport, RestartPolicy::disabled());
        client.start().await.unwrap();

        handle.kill();
        let err = client.call_tool("get_weather", serde_json::json!({})).await.unwrap_err();
        assert!(err.is_crash());
        assert_eq!(client.state(), ServerState::Failed);

        let err = client.call_tool("get_weather", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable { .. }));

        // The background task only tears the transport down.
        client.stop().await;
        assert_eq!(handle.start_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_restart() {
        let (transport, handle) = ScriptedTransport::echo_payload();
        let policy = RestartPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
        };
        let client = client(transport, policy);
        client.start().await.unwrap();

        handle.kill();
        let err = client.call_tool("get_weather", serde_json::json!({})).await.unwrap_err();
        assert!(err.is_crash());
        assert_eq!(client.state(), ServerState::Restarting);

        client.stop().await;
        assert_eq!(client.state(), ServerState::Stopped);

        // Longer than every backoff step combined.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(client.state(), ServerState::Stopped);
        assert_eq!(handle.start_count(), 1);
        assert!(client
            .call_tool("get_weather", serde_json::json!({}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_stop_keeps_failed_server_failed() {
        let (transport, handle) = ScriptedTransport::echo_payload();
        handle.fail_next_starts(1);
        let client = client(transport, RestartPolicy::default());
        assert!(client.start().await.is_err());

        client.stop().await;
        assert_eq!(client.state(), ServerState::Failed);
        assert!(matches!(client.start().await, Err(ToolError::Unavailable { .. })));
        assert_eq!(handle.start_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_twice_stays_stopped() {
        let (transport, _handle) = ScriptedTransport::echo_payload();
        let client = client(transport, RestartPolicy::default());
        client.start().await.unwrap();

        client.stop().await;
        client.stop().await;
        assert_eq!(client.state(), ServerState::Stopped);
    }
}
