pub(crate) mod archive;   // Single-entry zip compression of dump files
pub(crate) mod audit;     // Best-effort audit trail of backup runs
pub(crate) mod db_dump;   // mysqldump-based primary exporter
mod logic;                // Orchestration of a single backup run
pub(crate) mod retention; // Age-based cleanup of compressed artifacts
pub(crate) mod scheduler; // Daily fixed-rate trigger
pub(crate) mod sql_export; // Introspection-based fallback exporter

use async_trait::async_trait;
use chrono::{DateTime, Local};
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

use crate::config::{AppConfig, BackupConfig};
use crate::errors::{BackupError, Result};
pub use logic::{BackupOrchestrator, BackupReport};
use scheduler::ScheduleHandle;

pub const DUMP_EXTENSION: &str = "sql";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Origin of a backup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Automated,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Manual => "manual",
            Trigger::Automated => "automated",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy that writes a full SQL dump of the database to `target`.
#[async_trait]
pub trait Exporter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn export(&self, target: &Path) -> Result<()>;
}

/// File naming convention `prefix_<trigger>_<YYYYMMDD_HHMMSS>.sql[.zip]`.
#[derive(Debug, Clone)]
pub struct ArtifactNaming {
    prefix: String,
    uncompressed: Regex,
    compressed: Regex,
}

impl ArtifactNaming {
    pub fn new(prefix: &str) -> Result<Self> {
        let dump_pattern = format!(
            r"^{}_(manual|automated)_\d{{8}}_\d{{6}}\.{}",
            regex::escape(prefix),
            DUMP_EXTENSION
        );
        let build = |pattern: String| {
            Regex::new(&pattern).map_err(|e| {
                BackupError::Config(format!("invalid backup file prefix '{}': {}", prefix, e))
            })
        };
        Ok(Self {
            prefix: prefix.to_string(),
            uncompressed: build(format!("{}$", dump_pattern))?,
            compressed: build(format!(r"{}\.{}$", dump_pattern, archive::ARCHIVE_EXTENSION))?,
        })
    }

    pub fn dump_file_name(&self, trigger: Trigger, timestamp: &DateTime<Local>) -> String {
        format!(
            "{}_{}_{}.{}",
            self.prefix,
            trigger,
            timestamp.format(TIMESTAMP_FORMAT),
            DUMP_EXTENSION
        )
    }

    pub fn is_uncompressed_dump(&self, file_name: &str) -> bool {
        self.uncompressed.is_match(file_name)
    }

    pub fn is_compressed_artifact(&self, file_name: &str) -> bool {
        self.compressed.is_match(file_name)
    }
}

/// A compressed backup found on disk.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Local>,
}

/// Lists compressed artifacts in `directory`, newest first.
///
/// Entries that cannot be read are skipped with a warning.
pub fn list_backups(directory: &Path, naming: &ArtifactNaming) -> Vec<BackupEntry> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable backup entry");
                continue;
            }
        };
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !entry.file_type().is_file() || !naming.is_compressed_artifact(name) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Skipping unreadable backup");
                continue;
            }
        };
        let modified = match metadata.modified() {
            Ok(modified) => DateTime::<Local>::from(modified),
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Skipping backup without modification time");
                continue;
            }
        };
        entries.push(BackupEntry {
            name: name.to_string(),
            size: metadata.len(),
            modified,
        });
    }
    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
    entries
}

/// Operations exposed to the administrative front-end.
pub struct BackupService {
    config: BackupConfig,
    naming: ArtifactNaming,
    orchestrator: Arc<BackupOrchestrator>,
    schedule: Mutex<Option<ScheduleHandle>>,
}

impl BackupService {
    pub fn from_config(app_config: &AppConfig) -> Result<Self> {
        let orchestrator = BackupOrchestrator::from_config(app_config)?;
        Self::new(app_config.backup.clone(), Arc::new(orchestrator))
    }

    pub fn new(config: BackupConfig, orchestrator: Arc<BackupOrchestrator>) -> Result<Self> {
        Ok(Self {
            naming: ArtifactNaming::new(&config.file_prefix)?,
            config,
            orchestrator,
            schedule: Mutex::new(None),
        })
    }

    pub async fn run_backup(&self, trigger: Trigger) -> Result<BackupReport> {
        self.orchestrator.run_backup(trigger).await
    }

    pub fn list_backups(&self) -> Vec<BackupEntry> {
        list_backups(&self.config.directory, &self.naming)
    }

    /// Starts the daily automated backup. Returns `false` when disabled.
    ///
    /// A schedule that is already running is replaced.
    pub fn start_automated_backup(&self) -> bool {
        let orchestrator = Arc::clone(&self.orchestrator);
        let handle = scheduler::start(&self.config.schedule, move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                match orchestrator.run_backup(Trigger::Automated).await {
                    Ok(report) => tracing::info!(
                        archive = %report.archive_path.display(),
                        "Automated backup completed"
                    ),
                    Err(e) => tracing::error!(error = %e, "Automated backup failed"),
                }
            }
        });

        let mut slot = self.schedule.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = slot.take() {
            previous.stop();
        }
        let started = handle.is_some();
        *slot = handle;
        started
    }

    /// Cancels future automated runs. A run already in progress finishes.
    pub fn stop_automated_backup(&self) {
        let mut slot = self.schedule.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(handle) = slot.take() {
            handle.stop();
            tracing::info!("Automated backup service stopped");
        }
    }

    pub fn is_automated_backup_running(&self) -> bool {
        let slot = self.schedule.lock().unwrap_or_else(|p| p.into_inner());
        slot.as_ref().is_some_and(|h| !h.is_stopped())
    }
}
