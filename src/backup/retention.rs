// attendance-backup/src/backup/retention.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use super::ArtifactNaming;
use super::archive::archive_path_for;
use crate::config::RetentionPolicy;
use crate::errors::BackupError;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Outcome of a retention sweep. Errors are collected, never raised.
#[derive(Debug, Default)]
pub struct RetentionReport {
    pub deleted: Vec<PathBuf>,
    pub errors: Vec<BackupError>,
}

impl RetentionReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

pub fn clean_old_backups(
    directory: &Path,
    naming: &ArtifactNaming,
    policy: RetentionPolicy,
    keep: Option<&str>,
) -> RetentionReport {
    clean_old_backups_at(directory, naming, policy, SystemTime::now(), keep)
}

/// Deletes compressed artifacts whose mtime is strictly before
/// `now - retention_days`. Files not matching the naming convention are
/// never considered, nor is the file named `keep`. A retention of zero days
/// is applied as-is. Uncompressed dumps are removed only once their archive
/// exists.
pub fn clean_old_backups_at(
    directory: &Path,
    naming: &ArtifactNaming,
    policy: RetentionPolicy,
    now: SystemTime,
    keep: Option<&str>,
) -> RetentionReport {
    let mut report = RetentionReport::default();
    let window = Duration::from_secs(u64::from(policy.retention_days) * SECONDS_PER_DAY);
    let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(directory).to_path_buf();
                report.errors.push(BackupError::Retention {
                    path,
                    source: e.into(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        // A dump whose archive exists is a leftover of a compression that
        // could not remove its source; it goes regardless of age.
        if naming.is_uncompressed_dump(name) && archive_path_for(entry.path()).is_file() {
            remove_artifact(entry.path(), name, &mut report);
            continue;
        }
        if !naming.is_compressed_artifact(name) || keep == Some(name) {
            continue;
        }

        let modified = match entry.metadata().map_err(std::io::Error::from).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(source) => {
                report.errors.push(BackupError::Retention {
                    path: entry.path().to_path_buf(),
                    source,
                });
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        remove_artifact(entry.path(), name, &mut report);
    }

    if report.deleted_count() > 0 {
        tracing::info!(
            deleted = report.deleted_count(),
            retention_days = policy.retention_days,
            "Cleaned old backup(s)"
        );
    }
    report
}

fn remove_artifact(path: &Path, name: &str, report: &mut RetentionReport) {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(file = %name, "Deleted old backup");
            report.deleted.push(path.to_path_buf());
        }
        Err(source) => report.errors.push(BackupError::Retention {
            path: path.to_path_buf(),
            source,
        }),
    }
}
