// attendance-backup/src/backup/logic.rs
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::archive;
use super::audit::{AuditSink, BackupRecord, LogOnlyAudit, MySqlAuditLog};
use super::db_dump::MySqlDumpExporter;
use super::retention::{self, RetentionReport};
use super::sql_export::SqlExportExporter;
use super::{ArtifactNaming, Exporter, Trigger};
use crate::config::{AppConfig, BackupConfig, RetentionPolicy};
use crate::errors::{BackupError, Result};
use crate::utils::format_file_size;

/// Result of a successful run.
#[derive(Debug)]
pub struct BackupReport {
    pub trigger: Trigger,
    pub archive_path: PathBuf,
    pub archive_size: u64,
    pub retention: RetentionReport,
}

/// Runs the export, compress, retain and audit pipeline. At most one run at a time.
pub struct BackupOrchestrator {
    directory: PathBuf,
    naming: ArtifactNaming,
    retention: RetentionPolicy,
    primary: Arc<dyn Exporter>,
    fallback: Arc<dyn Exporter>,
    audit: Arc<dyn AuditSink>,
    run_guard: Mutex<()>,
}

impl BackupOrchestrator {
    pub fn new(
        config: &BackupConfig,
        primary: Arc<dyn Exporter>,
        fallback: Arc<dyn Exporter>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        Ok(Self {
            directory: config.directory.clone(),
            naming: ArtifactNaming::new(&config.file_prefix)?,
            retention: config.retention,
            primary,
            fallback,
            audit,
            run_guard: Mutex::new(()),
        })
    }

    /// Wires the MySQL exporters and the configured audit sink.
    pub fn from_config(app_config: &AppConfig) -> Result<Self> {
        let database = &app_config.database;
        let primary = Arc::new(MySqlDumpExporter::new(
            database.clone(),
            app_config.backup.dump_tool.clone(),
        ));
        let fallback = Arc::new(SqlExportExporter::new(database.clone()));
        let audit: Arc<dyn AuditSink> = if app_config.audit.enabled {
            Arc::new(MySqlAuditLog::new(database.clone()))
        } else {
            tracing::info!("Database audit logging disabled, backup records go to the log only");
            Arc::new(LogOnlyAudit)
        };
        Self::new(&app_config.backup, primary, fallback, audit)
    }

    /// Performs one complete backup.
    ///
    /// Fails with [`BackupError::InProgress`] when another run holds the guard;
    /// such a rejected attempt leaves no audit record.
    pub async fn run_backup(&self, trigger: Trigger) -> Result<BackupReport> {
        let Ok(_guard) = self.run_guard.try_lock() else {
            tracing::warn!(%trigger, "Backup requested while another run is in progress");
            return Err(BackupError::InProgress);
        };

        let started_at = Local::now();
        let dump_name = self.naming.dump_file_name(trigger, &started_at);
        let dump_path = self.directory.join(&dump_name);
        tracing::info!(%trigger, file = %dump_name, "Starting backup");

        let outcome = self.produce_archive(&dump_path).await;

        let record = match &outcome {
            Ok((archive_path, _)) => {
                BackupRecord::success(trigger, file_name_of(archive_path, &dump_name), started_at)
            }
            Err(e) => BackupRecord::failure(trigger, dump_name.clone(), e.to_string(), started_at),
        };
        if let Err(e) = self.audit.record(&record).await {
            tracing::warn!(error = %e, "Failed to write backup audit record");
        }

        let (archive_path, retention) = outcome.map_err(|e| {
            tracing::error!(%trigger, error = %e, "Backup failed");
            e
        })?;
        let archive_size = std::fs::metadata(&archive_path).map(|m| m.len()).unwrap_or(0);
        tracing::info!(
            %trigger,
            archive = %archive_path.display(),
            size = %format_file_size(archive_size),
            deleted_old = retention.deleted_count(),
            "Backup completed"
        );

        Ok(BackupReport {
            trigger,
            archive_path,
            archive_size,
            retention,
        })
    }

    async fn produce_archive(&self, dump_path: &Path) -> Result<(PathBuf, RetentionReport)> {
        tokio::fs::create_dir_all(&self.directory).await?;

        self.export_with_fallback(dump_path).await?;

        let source = dump_path.to_path_buf();
        let archive_path = tokio::task::spawn_blocking(move || archive::compress_dump(&source))
            .await
            .map_err(|e| BackupError::Compression {
                path: dump_path.to_path_buf(),
                message: format!("compression task failed: {}", e),
            })??;

        let directory = self.directory.clone();
        let naming = self.naming.clone();
        let policy = self.retention;
        // The archive just written is never swept, even with a zero-day window.
        let keep = archive_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let retention = tokio::task::spawn_blocking(move || {
            retention::clean_old_backups(&directory, &naming, policy, keep.as_deref())
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Retention task failed");
            RetentionReport::default()
        });
        for error in &retention.errors {
            tracing::warn!(error = %error, "Retention cleanup problem");
        }

        Ok((archive_path, retention))
    }

    /// Primary exporter, then the fallback exactly once. A success with an
    /// empty file counts as a failure.
    async fn export_with_fallback(&self, dump_path: &Path) -> Result<()> {
        let primary_error = match self.try_export(self.primary.as_ref(), dump_path).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        tracing::warn!(
            exporter = self.primary.name(),
            error = %primary_error,
            fallback = self.fallback.name(),
            "Primary export failed, trying fallback"
        );

        match self.try_export(self.fallback.as_ref(), dump_path).await {
            Ok(()) => Ok(()),
            Err(fallback_error) => {
                tracing::error!(
                    exporter = self.fallback.name(),
                    error = %fallback_error,
                    "Fallback export failed"
                );
                // No dump artifact survives a run where every exporter failed.
                if let Err(e) = tokio::fs::remove_file(dump_path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %dump_path.display(), error = %e, "Failed to remove partial dump");
                    }
                }
                Err(fallback_error)
            }
        }
    }

    async fn try_export(&self, exporter: &dyn Exporter, dump_path: &Path) -> Result<()> {
        exporter.export(dump_path).await?;
        let size = tokio::fs::metadata(dump_path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(BackupError::ToolUnavailable(format!(
                "{} produced an empty dump",
                exporter.name()
            )));
        }
        Ok(())
    }
}

fn file_name_of(path: &Path, fallback: &str) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or_else(|| fallback.to_string(), str::to_string)
}
