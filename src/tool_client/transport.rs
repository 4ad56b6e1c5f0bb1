//! Duplex line transport to a tool server process.
//!
//! A server is either a local child process or the same process started on
//! another machine through `ssh`. Either way the transport sees three pipes:
//! - stdin carries request lines
//! - stdout carries reply lines
//! - stderr is diagnostics; its first line is kept as the greeting and the
//!   rest is forwarded to `tracing`

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;

use super::errors::ToolError;
use super::types::TransportState;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Grace period between the terminate signal and a forced kill.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Options passed to `ssh` so unattended starts never prompt for host keys.
const SSH_OPTIONS: [&str; 4] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
];

// ─── Transport Trait ─────────────────────────────────────────────────────────

/// Byte-level duplex channel to one tool server.
///
/// Implementations are driven by a single owner (the supervisor) behind a
/// mutex, so every method takes `&mut self`.
#[async_trait]
pub trait Transport: Send {
    /// Name of the server this transport talks to (used in errors and logs).
    fn server_name(&self) -> &str;

    fn state(&self) -> TransportState;

    /// Spawn the server. A no-op when already running.
    async fn start(&mut self) -> Result<(), ToolError>;

    /// Best-effort read of the first diagnostic line.
    async fn read_greeting(&mut self, timeout: Duration) -> Option<String>;

    /// Write `line` followed by `\n` and flush.
    async fn write_line(&mut self, line: &str) -> Result<(), ToolError>;

    /// Wait for one newline-terminated line, without the terminator.
    async fn read_line(&mut self, timeout: Duration) -> Result<String, ToolError>;

    /// Terminate the server and wait for it to exit. Idempotent.
    async fn stop(&mut self);

    /// Poll whether the server process is still running.
    fn is_alive(&mut self) -> bool;
}

// ─── Transport Spec ──────────────────────────────────────────────────────────

/// How to reach a tool server.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSpec {
    Local(LocalCommand),
    Remote(SshTarget),
}

/// A server started directly as a child process.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// A server started on another host over `ssh`.
#[derive(Debug, Clone, PartialEq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub identity_file: PathBuf,
    /// Interpreter or executable on the remote host.
    pub program: String,
    pub args: Vec<String>,
    /// Exported into the remote command's environment.
    pub env: BTreeMap<String, String>,
}

impl SshTarget {
    /// The command string the remote shell runs, with every word escaped.
    ///
    /// Environment entries become `NAME=value` assignments in front of the
    /// program.
    pub fn remote_command(&self) -> Result<String, ToolError> {
        let mut words = Vec::with_capacity(self.env.len() + self.args.len() + 1);

        for (name, value) in &self.env {
            if !is_env_name(name) {
                return Err(ToolError::ConfigError {
                    reason: format!("invalid environment variable name '{name}'"),
                });
            }
            words.push(format!("{name}={}", quote_word(value)?));
        }

        words.push(quote_word(&self.program)?);
        for arg in &self.args {
            words.push(quote_word(arg)?);
        }

        Ok(words.join(" "))
    }

    /// Arguments for the local `ssh` binary.
    pub fn ssh_args(&self) -> Result<Vec<String>, ToolError> {
        let mut args = vec![
            "-i".to_string(),
            self.identity_file.display().to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        args.extend(SSH_OPTIONS.iter().map(|s| s.to_string()));
        args.push(format!("{}@{}", self.user, self.host));
        args.push(self.remote_command()?);
        Ok(args)
    }
}

impl TransportSpec {
    /// The executable spawned locally.
    pub fn program(&self) -> &str {
        match self {
            TransportSpec::Local(local) => &local.program,
            TransportSpec::Remote(_) => "ssh",
        }
    }

    /// Arguments passed to [`TransportSpec::program`].
    pub fn args(&self) -> Result<Vec<String>, ToolError> {
        match self {
            TransportSpec::Local(local) => Ok(local.args.clone()),
            TransportSpec::Remote(target) => target.ssh_args(),
        }
    }

    /// The full command as a shell-escaped string.
    pub fn command_line(&self) -> Result<String, ToolError> {
        let args = self.args()?;
        shlex::try_join(std::iter::once(self.program()).chain(args.iter().map(String::as_str)))
            .map_err(|e| ToolError::ConfigError {
                reason: format!("cannot quote command: {e}"),
            })
    }

    /// Short human-readable form for logs. Never includes environment values.
    pub fn describe(&self) -> String {
        match self {
            TransportSpec::Local(local) => {
                let mut parts = vec![local.program.clone()];
                parts.extend(local.args.iter().cloned());
                parts.join(" ")
            }
            TransportSpec::Remote(target) => {
                let mut parts = vec![format!(
                    "ssh {}@{}:{}",
                    target.user, target.host, target.port
                )];
                parts.push(target.program.clone());
                parts.extend(target.args.iter().cloned());
                parts.join(" ")
            }
        }
    }

    fn build_command(&self) -> Result<Command, ToolError> {
        let mut cmd = Command::new(self.program());
        cmd.args(self.args()?);

        if let TransportSpec::Local(local) = self {
            for (key, value) in &local.env {
                cmd.env(key, value);
            }
            if let Some(dir) = &local.cwd {
                cmd.current_dir(dir);
            }
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        Ok(cmd)
    }
}

fn quote_word(word: &str) -> Result<String, ToolError> {
    shlex::try_quote(word)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| ToolError::ConfigError {
            reason: format!("cannot quote '{word}': {e}"),
        })
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

// ─── Process Transport ───────────────────────────────────────────────────────

/// [`Transport`] backed by a real child process.
pub struct ProcessTransport {
    server_name: String,
    spec: TransportSpec,
    state: TransportState,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    /// Bytes of a line whose read was cut short by a timeout.
    partial: Vec<u8>,
    greeting: Option<oneshot::Receiver<String>>,
}

impl ProcessTransport {
    pub fn new(server_name: &str, spec: TransportSpec) -> Self {
        Self {
            server_name: server_name.to_string(),
            spec,
            state: TransportState::NotStarted,
            child: None,
            stdin: None,
            stdout: None,
            partial: Vec::new(),
            greeting: None,
        }
    }

    pub fn spec(&self) -> &TransportSpec {
        &self.spec
    }

    /// OS process id of the running child.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn state(&self) -> TransportState {
        self.state
    }

    async fn start(&mut self) -> Result<(), ToolError> {
        if self.state == TransportState::Running {
            return Ok(());
        }

        let spawn_failed = |reason: String| ToolError::SpawnFailed {
            server: self.server_name.clone(),
            reason,
        };

        let mut cmd = self
            .spec
            .build_command()
            .map_err(|e| spawn_failed(e.to_string()))?;
        let mut child = cmd.spawn().map_err(|e| spawn_failed(format!("{e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_failed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_failed("failed to capture stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let (tx, rx) = oneshot::channel();
            tokio::spawn(forward_stderr(self.server_name.clone(), stderr, tx));
            self.greeting = Some(rx);
        }

        tracing::info!(
            server = %self.server_name,
            pid = child.id(),
            command = %self.spec.describe(),
            "spawned tool server"
        );

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        self.partial.clear();
        self.state = TransportState::Running;
        Ok(())
    }

    async fn read_greeting(&mut self, timeout: Duration) -> Option<String> {
        let rx = self.greeting.take()?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(line)) => Some(line),
            _ => None,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ToolError> {
        let server = &self.server_name;
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(ToolError::NotConnected {
                server: server.clone(),
            });
        };

        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');

        stdin
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| io_error(server, "failed to write to stdin", e))?;
        stdin
            .flush()
            .await
            .map_err(|e| io_error(server, "failed to flush stdin", e))?;
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, ToolError> {
        let server = &self.server_name;
        let Some(reader) = self.stdout.as_mut() else {
            return Err(ToolError::NotConnected {
                server: server.clone(),
            });
        };

        // `read_until` appends to `partial`, so bytes read before a timeout
        // are kept for the next call.
        let read = tokio::time::timeout(timeout, reader.read_until(b'\n', &mut self.partial)).await;

        match read {
            Err(_) => Err(ToolError::Timeout {
                server: server.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(io_error(server, "failed to read from stdout", e)),
            Ok(Ok(_)) if !self.partial.ends_with(b"\n") => {
                self.partial.clear();
                Err(ToolError::Eof {
                    server: server.clone(),
                })
            }
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&self.partial)
                    .trim_end_matches(|c| c == '\n' || c == '\r')
                    .to_string();
                self.partial.clear();
                Ok(line)
            }
        }
    }

    async fn stop(&mut self) {
        if self.state != TransportState::Running {
            self.state = TransportState::Stopped;
            return;
        }

        // Closing stdin is the end-of-session signal for stdio servers.
        self.stdin = None;
        self.stdout = None;
        self.greeting = None;
        self.partial.clear();

        if let Some(mut child) = self.child.take() {
            request_terminate(&child);

            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.server_name, %status, "tool server exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(server = %self.server_name, error = %e, "wait failed, killing");
                    let _ = child.kill().await;
                }
                Err(_) => {
                    tracing::warn!(
                        server = %self.server_name,
                        grace_secs = SHUTDOWN_TIMEOUT.as_secs(),
                        "tool server ignored terminate, killing"
                    );
                    if let Err(e) = child.kill().await {
                        tracing::warn!(server = %self.server_name, error = %e, "kill failed");
                    }
                }
            }
        }

        self.state = TransportState::Stopped;
        tracing::info!(server = %self.server_name, "tool server stopped");
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

fn io_error(server: &str, context: &str, e: std::io::Error) -> ToolError {
    ToolError::Io {
        server: server.to_string(),
        reason: format!("{context}: {e}"),
    }
}

#[cfg(unix)]
fn request_terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: `pid` is our own child and has not been reaped yet
        // (`id()` returns None after that), so it cannot name another process.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn request_terminate(_child: &Child) {}

/// Hand the first stderr line to the greeting slot and log the rest.
async fn forward_stderr(server: String, stderr: ChildStderr, greeting: oneshot::Sender<String>) {
    let mut lines = BufReader::new(stderr).lines();
    let mut greeting = Some(greeting);

    while let Ok(Some(line)) = lines.next_line().await {
        match greeting.take() {
            Some(tx) => {
                let _ = tx.send(line);
            }
            None => tracing::debug!(server = %server, line = %line, "tool server stderr"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
