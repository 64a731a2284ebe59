use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Dump binary missing, failed to spawn, exited non-zero or wrote nothing.
    #[error("Dump tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Introspection failed on {table}: {message}")]
    Introspection { table: String, message: String },

    #[error("Compression failed for {}: {message}", path.display())]
    Compression { path: PathBuf, message: String },

    #[error("Failed to delete old backup {}: {source}", path.display())]
    Retention {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audit logging failed: {0}")]
    Audit(String),

    #[error("Backup already in progress")]
    InProgress,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;
