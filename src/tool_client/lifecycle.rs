//! Server process lifecycle management.
//!
//! A [`Supervisor`] owns exactly one [`Transport`] for one tool domain and
//! tracks its state: Starting → Running → Stopping → Stopped, with
//! Restarting after a crash and Failed once the server is given up on.
//! The request/reply exchange itself also lives here, since only the
//! supervisor may touch the transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use super::codec::RpcCodec;
use super::errors::ToolError;
use super::transport::Transport;
use super::types::{JsonRpcResponse, ServerState, ToolInvocation};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Maximum restart attempts before giving up on a server.
const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;

/// Base delay between restart attempts (doubles each time).
const DEFAULT_RESTART_BASE_DELAY: Duration = Duration::from_secs(1);

/// How long to wait for the greeting line on stderr.
pub const DEFAULT_GREETING_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Restart Policy ──────────────────────────────────────────────────────────

/// Bounded exponential backoff for crashed servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Zero disables restarts: a crash marks the server failed.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            base_delay: DEFAULT_RESTART_BASE_DELAY,
        }
    }
}

impl RestartPolicy {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before the given attempt (0-based): base, 2×base, 4×base, …
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

// ─── Supervisor ──────────────────────────────────────────────────────────────

/// Owner of one tool server's transport and lifecycle state.
pub struct Supervisor {
    name: String,
    transport: Box<dyn Transport>,
    codec: RpcCodec,
    state: Arc<watch::Sender<ServerState>>,
    policy: RestartPolicy,
    greeting_timeout: Duration,
    restart_count: u32,
}

impl Supervisor {
    pub fn new(
        name: &str,
        transport: Box<dyn Transport>,
        state: Arc<watch::Sender<ServerState>>,
        policy: RestartPolicy,
        greeting_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            transport,
            codec: RpcCodec::new(),
            state,
            policy,
            greeting_timeout,
            restart_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }

    /// Number of successful restarts since the supervisor was created.
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    fn set_state(&self, state: ServerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(server = %self.name, from = %previous, to = %state, "server state change");
        }
    }

    /// Move to `to` only while the state is still `from`.
    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        });
        if moved {
            tracing::debug!(server = %self.name, from = %from, to = %to, "server state change");
        }
        moved
    }

    // ─── Start / Stop ────────────────────────────────────────────────────

    /// Start the server. A spawn failure marks it permanently failed.
    pub async fn start(&mut self) -> Result<(), ToolError> {
        match self.state() {
            ServerState::Running => return Ok(()),
            ServerState::Failed => return Err(self.unavailable("server has failed")),
            _ => {}
        }

        self.set_state(ServerState::Starting);
        match self.launch().await {
            Ok(()) => {
                self.set_state(ServerState::Running);
                tracing::info!(server = %self.name, "tool server started");
                Ok(())
            }
            Err(e) => {
                self.set_state(ServerState::Failed);
                tracing::warn!(
                    server = %self.name,
                    error = %e,
                    "tool server failed to start, marking unavailable"
                );
                Err(e)
            }
        }
    }

    /// Spawn the transport and consume the greeting line.
    async fn launch(&mut self) -> Result<(), ToolError> {
        self.transport.start().await?;

        match self.transport.read_greeting(self.greeting_timeout).await {
            Some(greeting) => {
                tracing::info!(server = %self.name, greeting = %greeting.trim(), "tool server greeting");
            }
            None => {
                tracing::warn!(
                    server = %self.name,
                    timeout_secs = self.greeting_timeout.as_secs_f32(),
                    "no greeting from tool server"
                );
            }
        }
        Ok(())
    }

    /// Stop the server. Idempotent.
    ///
    /// A failed server stays `Failed`: its process is reaped but the state
    /// never goes back to something `start` would relaunch.
    pub async fn stop(&mut self) {
        match self.state() {
            ServerState::Stopped => {}
            ServerState::Failed => self.transport.stop().await,
            _ => {
                self.set_state(ServerState::Stopping);
                self.transport.stop().await;
                self.set_state(ServerState::Stopped);
            }
        }
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    /// Check that a call may be sent right now.
    pub fn ensure_ready(&mut self) -> Result<(), ToolError> {
        match self.state() {
            ServerState::Running => {
                if self.transport.is_alive() {
                    Ok(())
                } else {
                    Err(ToolError::ServerCrashed {
                        server: self.name.clone(),
                        reason: "process is no longer running".into(),
                    })
                }
            }
            ServerState::Starting => Err(self.unavailable("server is starting")),
            ServerState::Restarting => Err(self.unavailable("restart pending")),
            ServerState::Failed => Err(self.unavailable("server has failed")),
            ServerState::NotStarted | ServerState::Stopping | ServerState::Stopped => {
                Err(ToolError::NotConnected {
                    server: self.name.clone(),
                })
            }
        }
    }

    /// Write one request and read until its reply arrives or the deadline passes.
    ///
    /// Replies carrying a different id are answers to earlier calls that
    /// timed out; they are discarded.
    pub async fn exchange(
        &mut self,
        invocation: &ToolInvocation,
    ) -> Result<JsonRpcResponse, ToolError> {
        let (id, line) = self.codec.encode(invocation)?;
        let deadline = Instant::now() + invocation.timeout;

        tracing::debug!(
            server = %self.name,
            tool = %invocation.tool_name,
            id,
            "sending tool call"
        );

        // An interrupted write can leave half a line in the child's stdin,
        // which would corrupt the next request. Treat it as a broken pipe.
        match tokio::time::timeout_at(deadline, self.transport.write_line(&line)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    server = %self.name,
                    tool = %invocation.tool_name,
                    id,
                    "write to tool server timed out"
                );
                return Err(ToolError::Io {
                    server: self.name.clone(),
                    reason: "write timed out, request may be partially written".into(),
                });
            }
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timeout(invocation));
            }

            let reply = match self.transport.read_line(remaining).await {
                Ok(reply) => reply,
                Err(ToolError::Timeout { .. }) => return Err(self.timeout(invocation)),
                Err(e) => return Err(e),
            };

            if reply.trim().is_empty() {
                continue;
            }

            let response = RpcCodec::decode(&reply)?;
            if response.answers(id) {
                tracing::debug!(
                    server = %self.name,
                    tool = %invocation.tool_name,
                    id,
                    bytes = reply.len(),
                    "received tool reply"
                );
                return Ok(response);
            }

            tracing::warn!(
                server = %self.name,
                expected = id,
                received = ?response.id,
                "discarding reply to an earlier request"
            );
        }
    }

    // ─── Restart ─────────────────────────────────────────────────────────

    /// Replace a crashed server process, backing off between attempts.
    ///
    /// Expects the state to already be `Restarting`. Leaves it `Running` on
    /// success and `Failed` when every attempt is used up. Does nothing once
    /// the state has moved on, so a `stop` issued meanwhile wins.
    pub async fn restart(&mut self) -> Result<(), ToolError> {
        for attempt in 0..self.policy.max_attempts {
            if self.restart_abandoned() {
                return Ok(());
            }
            let delay = self.policy.delay_for(attempt);
            tracing::info!(
                server = %self.name,
                attempt = attempt + 1,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "restarting tool server"
            );
            sleep(delay).await;
            if self.restart_abandoned() {
                return Ok(());
            }

            self.transport.stop().await;
            match self.launch().await {
                Ok(()) => {
                    self.restart_count += 1;
                    if self.transition(ServerState::Restarting, ServerState::Running) {
                        tracing::info!(server = %self.name, restarts = self.restart_count, "tool server restarted");
                    }
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        server = %self.name,
                        attempt = attempt + 1,
                        error = %e,
                        "restart attempt failed"
                    );
                }
            }
        }

        self.transport.stop().await;
        if !self.transition(ServerState::Restarting, ServerState::Failed) {
            return Ok(());
        }
        Err(ToolError::RestartExhausted {
            server: self.name.clone(),
            attempts: self.policy.max_attempts,
        })
    }

    fn restart_abandoned(&self) -> bool {
        let state = self.state();
        if state == ServerState::Restarting {
            return false;
        }
        tracing::debug!(server = %self.name, state = %state, "restart abandoned");
        true
    }

    fn timeout(&self, invocation: &ToolInvocation) -> ToolError {
        tracing::warn!(
            server = %self.name,
            tool = %invocation.tool_name,
            timeout_ms = invocation.timeout.as_millis() as u64,
            "tool call timed out"
        );
        ToolError::Timeout {
            server: self.name.clone(),
            timeout_ms: invocation.timeout.as_millis() as u64,
        }
    }

    fn unavailable(&self, reason: &str) -> ToolError {
        ToolError::Unavailable {
            server: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
