//! Tracing setup shared by the binaries.
//!
//! Tool servers must keep stdout clean for protocol traffic, so they log to
//! stderr. The interactive chat binary logs to a rotated file under the
//! platform data directory so log lines never interleave with the prompt.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "toolbridge=info,warn";

/// Log file name inside the log directory.
pub const LOG_FILE_NAME: &str = "toolbridge.log";

/// Rotated copies kept (`toolbridge.log.1` .. `.3`).
const KEEP_ROTATED: u32 = 3;

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Rotated `toolbridge.log` in this directory.
    File(PathBuf),
}

/// Platform data directory for toolbridge state and logs.
///
/// Falls back to `~/.toolbridge/` only if the platform directory cannot be
/// resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("toolbridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".toolbridge")
}

/// Install the global tracing subscriber.
///
/// Returns the log file path for [`LogTarget::File`]. Calling this twice is
/// harmless; the first subscriber stays installed.
pub fn init_tracing(target: LogTarget) -> io::Result<Option<PathBuf>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match target {
        LogTarget::Stderr => {
            let _ = fmt::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .with_ansi(false)
                .with_target(true)
                .try_init();
            Ok(None)
        }
        LogTarget::File(dir) => {
            std::fs::create_dir_all(&dir)?;
            let log_path = dir.join(LOG_FILE_NAME);
            rotate_log_file(&log_path, KEEP_ROTATED);

            let log_file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?;

            let _ = fmt::fmt()
                .with_env_filter(filter)
                .with_writer(FlushingWriter::new(log_file))
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
            Ok(Some(log_path))
        }
    }
}

/// Rotate log files: `x.log` → `x.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
pub fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `File` and flushes after every write, so log lines
/// survive a crash.
#[derive(Clone)]
pub struct FlushingWriter {
    file: Arc<Mutex<File>>,
}

impl FlushingWriter {
    pub fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("lock poisoned: {e}")))?;
        let n = f.write(buf)?;
        f.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("lock poisoned: {e}")))?;
        f.flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
