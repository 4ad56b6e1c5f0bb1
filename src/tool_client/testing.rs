//! Scripted in-memory transport for tests.
//!
//! Requests are answered by a responder closure; replies can be delayed to
//! model slow or late servers, and the handle can kill the "process", stall
//! its stdin or make the next starts fail.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};

use super::codec::RpcCodec;
use super::envelope::wrap_payload;
use super::errors::ToolError;
use super::transport::Transport;
use super::types::{JsonRpcRequest, TransportState};

pub(crate) type Responder = Box<dyn FnMut(&JsonRpcRequest) -> Vec<Reply> + Send>;

/// A reply line released `delay` after the request was written.
pub(crate) struct Reply {
    pub delay: Duration,
    pub line: String,
}

impl Reply {
    pub fn now(line: String) -> Self {
        Self {
            delay: Duration::ZERO,
            line,
        }
    }

    pub fn after(delay: Duration, line: String) -> Self {
        Self { delay, line }
    }
}

/// What the fake server observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WireEvent {
    Write(u64),
    Read(Option<u64>),
}

#[derive(Default)]
struct Shared {
    log: Vec<WireEvent>,
    queue: VecDeque<(Instant, String)>,
    alive: bool,
    starts: u32,
    fail_starts: u32,
    stall_writes: bool,
}

/// Test-side controls for a [`ScriptedTransport`].
#[derive(Clone)]
pub(crate) struct ScriptHandle {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptHandle {
    fn with<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let mut shared = self.shared.lock().unwrap();
        f(&mut shared)
    }

    /// Simulate the child process dying.
    pub fn kill(&self) {
        self.with(|s| {
            s.alive = false;
            s.queue.clear();
        });
    }

    pub fn fail_next_starts(&self, n: u32) {
        self.with(|s| s.fail_starts = n);
    }

    /// Make every following write block forever, like a child that stopped
    /// draining its stdin.
    pub fn stall_writes(&self) {
        self.with(|s| s.stall_writes = true);
    }

    pub fn start_count(&self) -> u32 {
        self.with(|s| s.starts)
    }

    pub fn log(&self) -> Vec<WireEvent> {
        self.with(|s| s.log.clone())
    }

    /// Queue a line on stdout that no request asked for.
    pub fn push_unsolicited(&self, line: String) {
        self.with(|s| s.queue.push_back((Instant::now(), line)));
    }
}

/// In-memory [`Transport`] driven by a responder closure.
pub(crate) struct ScriptedTransport {
    state: TransportState,
    shared: Arc<Mutex<Shared>>,
    responder: Responder,
    greeting: Option<String>,
}

impl ScriptedTransport {
    pub fn new(
        responder: impl FnMut(&JsonRpcRequest) -> Vec<Reply> + Send + 'static,
    ) -> (Self, ScriptHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let transport = Self {
            state: TransportState::NotStarted,
            shared: Arc::clone(&shared),
            responder: Box::new(responder),
            greeting: None,
        };
        (transport, ScriptHandle { shared })
    }

    /// Answers every call with `{"tool": <name>, "arguments": <arguments>}`.
    pub fn echo_payload() -> (Self, ScriptHandle) {
        Self::new(|req| {
            vec![Reply::now(result_line(
                req.id,
                &serde_json::json!({
                    "tool": req.params.name,
                    "arguments": req.params.arguments,
                }),
            ))]
        })
    }

    /// Never answers.
    pub fn silent() -> (Self, ScriptHandle) {
        Self::new(|_| Vec::new())
    }

    fn with<R>(&self, f: impl FnOnce(&mut Shared) -> R) -> R {
        let mut shared = self.shared.lock().unwrap();
        f(&mut shared)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn server_name(&self) -> &str {
        "scripted"
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn start(&mut self) -> Result<(), ToolError> {
        let failed = self.with(|s| {
            s.starts += 1;
            if s.fail_starts > 0 {
                s.fail_starts -= 1;
                true
            } else {
                s.alive = true;
                false
            }
        });
        if failed {
            return Err(ToolError::SpawnFailed {
                server: "scripted".into(),
                reason: "scripted start failure".into(),
            });
        }
        self.state = TransportState::Running;
        self.greeting = Some("scripted server ready".into());
        Ok(())
    }

    async fn read_greeting(&mut self, _timeout: Duration) -> Option<String> {
        self.greeting.take()
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ToolError> {
        if self.state != TransportState::Running {
            return Err(ToolError::NotConnected {
                server: "scripted".into(),
            });
        }
        if !self.with(|s| s.alive) {
            return Err(ToolError::Io {
                server: "scripted".into(),
                reason: "broken pipe".into(),
            });
        }

        if self.with(|s| s.stall_writes) {
            std::future::pending::<()>().await;
        }

        let request = RpcCodec::decode_request(line)?;
        let replies = (self.responder)(&request);
        let now = Instant::now();
        self.with(|s| {
            s.log.push(WireEvent::Write(request.id));
            for reply in replies {
                s.queue.push_back((now + reply.delay, reply.line));
            }
        });
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, ToolError> {
        if self.state != TransportState::Running {
            return Err(ToolError::NotConnected {
                server: "scripted".into(),
            });
        }

        let deadline = Instant::now() + timeout;
        let (alive, next) = self.with(|s| (s.alive, s.queue.front().map(|(at, _)| *at)));
        if !alive {
            return Err(ToolError::Eof {
                server: "scripted".into(),
            });
        }

        match next {
            Some(ready_at) if ready_at <= deadline => {
                sleep_until(ready_at).await;
                let line = self.with(|s| {
                    let line = s.queue.pop_front().map(|(_, line)| line);
                    if let Some(line) = &line {
                        s.log.push(WireEvent::Read(line_id(line)));
                    }
                    line
                });
                line.ok_or_else(|| ToolError::Eof {
                    server: "scripted".into(),
                })
            }
            _ => {
                sleep_until(deadline).await;
                Err(ToolError::Timeout {
                    server: "scripted".into(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn stop(&mut self) {
        self.with(|s| {
            s.alive = false;
            s.queue.clear();
        });
        self.state = TransportState::Stopped;
    }

    fn is_alive(&mut self) -> bool {
        self.state == TransportState::Running && self.with(|s| s.alive)
    }
}

fn line_id(line: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}

/// A successful reply carrying `payload` in the text envelope.
pub(crate) fn result_line(id: u64, payload: &serde_json::Value) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "result": wrap_payload(payload),
        "id": id,
    })
    .to_string()
}

/// An error reply.
pub(crate) fn error_line(id: u64, code: i32, message: &str) -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message},
        "id": id,
    })
    .to_string()
}
