//! Tool server configuration loading.
//!
//! Reads `tool-servers.yaml`, resolves `${VAR}` / `${VAR:-default}`
//! references and turns each server entry into a [`TransportSpec`] plus
//! [`ClientOptions`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::client::{ClientOptions, DEFAULT_CALL_TIMEOUT};
use super::errors::ToolError;
use super::lifecycle::RestartPolicy;
use super::transport::{LocalCommand, SshTarget, TransportSpec};

// ─── Constants ───────────────────────────────────────────────────────────────

/// File searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "tool-servers.yaml";

/// Environment variable naming the config file directly.
pub const CONFIG_ENV_VAR: &str = "TOOLBRIDGE_CONFIG";

const DEFAULT_SSH_PORT: u16 = 22;

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level config (mirrors `tool-servers.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct ToolServersConfig {
    #[serde(default = "default_greeting_timeout_secs")]
    pub greeting_timeout_secs: u64,
    #[serde(default)]
    pub restart: RestartConfig,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

/// Restart backoff settings shared by every server.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// One tool server entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable (local) or remote interpreter (ssh).
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for local servers.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Run the server on another host over ssh.
    #[serde(default)]
    pub ssh: Option<SshConfig>,
    /// Per-call timeout; the domain default applies when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Remote host for an ssh-launched server.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub identity_file: String,
}

fn default_greeting_timeout_secs() -> u64 {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl ToolServersConfig {
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_attempts: self.restart.max_attempts,
            base_delay: Duration::from_millis(self.restart.base_delay_ms),
        }
    }

    pub fn greeting_timeout(&self) -> Duration {
        Duration::from_secs(self.greeting_timeout_secs)
    }

    /// Options for one server. `domain_timeout` is used when the entry has
    /// no `timeout_secs` of its own.
    pub fn client_options(&self, server: &ServerConfig, domain_timeout: Option<Duration>) -> ClientOptions {
        ClientOptions {
            call_timeout: server.call_timeout(domain_timeout),
            greeting_timeout: self.greeting_timeout(),
            restart: self.restart_policy(),
        }
    }
}

impl ServerConfig {
    pub fn call_timeout(&self, domain_timeout: Option<Duration>) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .or(domain_timeout)
            .unwrap_or(DEFAULT_CALL_TIMEOUT)
    }

    /// Build the launch description for this server.
    pub fn transport_spec(&self, name: &str) -> Result<TransportSpec, ToolError> {
        if self.command.trim().is_empty() {
            return Err(ToolError::ConfigError {
                reason: format!("server '{name}' has an empty command"),
            });
        }

        match &self.ssh {
            None => Ok(TransportSpec::Local(LocalCommand {
                program: self.command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
                cwd: self.cwd.as_deref().map(expand_home),
            })),
            Some(ssh) => {
                if self.cwd.is_some() {
                    return Err(ToolError::ConfigError {
                        reason: format!("server '{name}': cwd is not supported for ssh servers"),
                    });
                }
                Ok(TransportSpec::Remote(SshTarget {
                    host: ssh.host.clone(),
                    port: ssh.port,
                    user: ssh.user.clone(),
                    identity_file: expand_home(&ssh.identity_file),
                    program: self.command.clone(),
                    args: self.args.clone(),
                    env: self.env.clone(),
                }))
            }
        }
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Uses `$TOOLBRIDGE_CONFIG` when it names an existing file, otherwise
/// searches upward from `start` for `tool-servers.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, ToolError> {
    // 1. Check env var
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = expand_home(&path);
        if candidate.is_file() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "{CONFIG_ENV_VAR} does not name a file, searching instead");
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(ToolError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Read, interpolate and parse a config file.
pub fn load_config(path: &Path) -> Result<ToolServersConfig, ToolError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ToolError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    parse_config(&raw)
}

/// Interpolate and parse config text.
pub fn parse_config(raw: &str) -> Result<ToolServersConfig, ToolError> {
    let interpolated = substitute_env(raw);
    Ok(serde_yaml::from_str(&interpolated)?)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Substitute `${VAR}` and `${VAR:-default}` references.
///
/// An unterminated `${` is kept as written.
fn substitute_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&lookup_env(&after[..close]));
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Value for one reference. A default also applies to a set-but-empty variable.
fn lookup_env(expr: &str) -> String {
    let (name, default) = match expr.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (expr, None),
    };
    match (std::env::var(name), default) {
        (Ok(value), Some(_)) if !value.is_empty() => value,
        (Ok(value), None) => value,
        (_, Some(default)) => expand_home(default).to_string_lossy().into_owned(),
        (Err(_), None) => {
            tracing::debug!(var = name, "unset variable in config, using empty string");
            String::new()
        }
    }
}

/// Resolve `~` and `~/...` against the home directory. `~user` forms are
/// left alone.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
