//! Tracing initialization and the per-server access log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

static DEBUG: OnceLock<bool> = OnceLock::new();

/// Whether debug mode is on. Read once from the `DEBUG` environment variable
/// at first use and immutable afterwards.
pub fn debug_enabled() -> bool {
    *DEBUG.get_or_init(|| {
        std::env::var("DEBUG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    })
}

/// Installs the global tracing subscriber. `RUST_LOG` wins when set;
/// otherwise the default level follows the debug flag. Safe to call more
/// than once; later calls are no-ops.
pub fn init(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Append-mode access log: one line per request.
pub struct AccessLog {
    file: Mutex<File>,
}

impl AccessLog {
    /// Opens (or creates) the log file for appending.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Writes one request line: id, method, path, status, bytes, duration.
    pub fn write_line(
        &self,
        request_id: &str,
        method: &str,
        path: &str,
        status: u16,
        bytes: usize,
        elapsed: Duration,
    ) {
        let line = format!(
            "{request_id} {method} {path} {status} {bytes} {}ms\n",
            elapsed.as_millis()
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }
}
