pub mod context;
pub mod domains;
pub mod tool_client;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use context::AppContext;
pub use domains::Domain;
pub use tool_client::{ToolClient, ToolError, ToolServersConfig};

/// Return the platform-standard data directory for toolbridge.
///
/// - macOS: `~/Library/Application Support/toolbridge/`
/// - Linux: `$XDG_DATA_HOME/toolbridge/` (fallback `~/.local/share/toolbridge/`)
///
/// Falls back to `~/.toolbridge/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("toolbridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolbridge")
}

/// Locate and load the tool server config.
///
/// An explicit path wins; otherwise `$TOOLBRIDGE_CONFIG` and then an upward
/// search from the working directory are tried.
pub fn resolve_config(explicit: Option<&Path>) -> Result<(PathBuf, ToolServersConfig), ToolError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let cwd = std::env::current_dir().map_err(|e| ToolError::ConfigError {
                reason: format!("cannot determine working directory: {e}"),
            })?;
            tool_client::config::find_config_path(&cwd)?
        }
    };

    let config = tool_client::config::load_config(&path)?;
    tracing::info!(
        path = %path.display(),
        servers = ?config.servers.keys().collect::<Vec<_>>(),
        "loaded tool server config"
    );
    Ok((path, config))
}

/// Initialize the tracing subscriber, writing structured logs to the data directory.
///
/// On each startup:
/// 1. Rotates existing logs (toolbridge.log → .1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh toolbridge.log, flushed after every event.
/// 3. Logs a startup banner with the log path.
///
/// Falls back to stderr when the log file cannot be opened. Returns the log
/// file path when file logging is active.
pub fn init_tracing() -> Option<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("toolbridge=info,warn"))
    };

    let log_dir = data_dir();
    let log_path = log_dir.join("toolbridge.log");
    let log_file = std::fs::create_dir_all(&log_dir).and_then(|()| {
        rotate_logs(&log_path, 3);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
    });

    match log_file {
        Ok(file) => {
            let _ = fmt::fmt()
                .with_env_filter(filter())
                .with_writer(SyncedLog::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .try_init();

            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                log_file = %log_path.display(),
                pid = std::process::id(),
                "=== toolbridge starting ==="
            );
            Some(log_path)
        }
        Err(e) => {
            let _ = fmt::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_target(true)
                .try_init();

            tracing::warn!(
                log_file = %log_path.display(),
                error = %e,
                "cannot open log file, logging to stderr"
            );
            None
        }
    }
}

/// `base` with a numeric suffix: `toolbridge.log` becomes `toolbridge.log.2`.
fn rotated_path(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

/// Shift `base` to `base.1`, `base.1` to `base.2` and so on, dropping
/// anything past `keep`. Gaps in the chain are fine.
fn rotate_logs(base: &Path, keep: u32) {
    if keep == 0 {
        return;
    }
    let _ = std::fs::remove_file(rotated_path(base, keep));
    for generation in (1..keep).rev() {
        let _ = std::fs::rename(rotated_path(base, generation), rotated_path(base, generation + 1));
    }
    let _ = std::fs::rename(base, rotated_path(base, 1));
}

/// Log file shared by all subscriber threads.
///
/// Each event gets the file for the whole formatted line and flushes when
/// done, so lines reach disk whole even if the process is killed.
struct SyncedLog {
    file: Mutex<File>,
}

impl SyncedLog {
    fn new(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }
}

struct SyncedLogWriter<'a>(MutexGuard<'a, File>);

impl Write for SyncedLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Drop for SyncedLogWriter<'_> {
    fn drop(&mut self) {
        let _ = self.0.flush();
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SyncedLog {
    type Writer = SyncedLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        // A panic while logging must not silence every later line.
        SyncedLogWriter(self.file.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
