use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use which::which;

use crate::errors::{BackupError, Result};

const DEFAULT_LOG_FILTER: &str = "attendance_backup=info";
const VERBOSE_LOG_FILTER: &str = "attendance_backup=debug,sqlx=warn";

/// Initializes the global tracing subscriber. `RUST_LOG` takes precedence.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Finds an executable by name in the system PATH (absolute paths pass through).
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).map_err(|e| {
        BackupError::ToolUnavailable(format!("{} executable not found in PATH: {}", name, e))
    })
}

pub fn format_file_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.2} KB", b / KB)
    } else if b < GB {
        format!("{:.2} MB", b / MB)
    } else {
        format!("{:.2} GB", b / GB)
    }
}
