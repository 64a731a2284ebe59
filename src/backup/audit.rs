// attendance-backup/src/backup/audit.rs
use async_trait::async_trait;
use chrono::{DateTime, Local};
use sqlx::{Connection, MySqlConnection};

use super::Trigger;
use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};

pub const AUDIT_ACTION: &str = "DATABASE_BACKUP";

/// One append-only entry per backup attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRecord {
    pub trigger: Trigger,
    pub filename: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl BackupRecord {
    pub fn success(trigger: Trigger, filename: String, timestamp: DateTime<Local>) -> Self {
        Self {
            trigger,
            filename,
            success: true,
            error_message: None,
            timestamp,
        }
    }

    pub fn failure(
        trigger: Trigger,
        filename: String,
        error_message: String,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            trigger,
            filename,
            success: false,
            error_message: Some(error_message),
            timestamp,
        }
    }

    /// Human-readable `details` column of the audit row.
    pub fn details(&self) -> String {
        let mut details = format!(
            "Type: {}, File: {}, Success: {}",
            self.trigger, self.filename, self.success
        );
        if let Some(error) = &self.error_message {
            details.push_str(", Error: ");
            details.push_str(error);
        }
        details
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &BackupRecord) -> Result<()>;
}

/// Writes to the `audit_logs` table, one connection per record.
pub struct MySqlAuditLog {
    database: DatabaseConfig,
}

impl MySqlAuditLog {
    pub fn new(database: DatabaseConfig) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AuditSink for MySqlAuditLog {
    async fn record(&self, entry: &BackupRecord) -> Result<()> {
        let url = self.database.connection_url()?;
        let mut conn = MySqlConnection::connect(&url)
            .await
            .map_err(|e| BackupError::Connection(format!("audit log: {}", e)))?;

        sqlx::query("INSERT INTO audit_logs (user_id, action, details) VALUES (NULL, ?, ?)")
            .bind(AUDIT_ACTION)
            .bind(entry.details())
            .execute(&mut conn)
            .await
            .map_err(|e| BackupError::Audit(e.to_string()))?;

        if let Err(e) = conn.close().await {
            tracing::debug!(error = %e, "Audit connection did not close cleanly");
        }
        Ok(())
    }
}

/// Used when database auditing is switched off; the record only reaches the log.
pub struct LogOnlyAudit;

#[async_trait]
impl AuditSink for LogOnlyAudit {
    async fn record(&self, entry: &BackupRecord) -> Result<()> {
        tracing::info!(
            action = AUDIT_ACTION,
            at = %entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            details = %entry.details(),
            "Backup audit record"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 15, 2, 0, 0).unwrap()
    }

    #[test]
    fn test_success_details() {
        let record = BackupRecord::success(
            Trigger::Automated,
            "rfid_backup_automated_20240115_020000.sql.zip".into(),
            ts(),
        );
        assert_eq!(
            record.details(),
            "Type: automated, File: rfid_backup_automated_20240115_020000.sql.zip, Success: true"
        );
    }

    #[test]
    fn test_failure_details_carry_error() {
        let record = BackupRecord::failure(
            Trigger::Manual,
            "rfid_backup_manual_20240115_020000.sql".into(),
            "Database connection error: refused".into(),
            ts(),
        );
        assert_eq!(
            record.details(),
            "Type: manual, File: rfid_backup_manual_20240115_020000.sql, Success: false, Error: Database connection error: refused"
        );
    }

    #[tokio::test]
    async fn test_log_only_audit_never_fails() {
        let record = BackupRecord::success(Trigger::Manual, "x.sql.zip".into(), ts());
        assert!(LogOnlyAudit.record(&record).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_database_is_connection_error() {
        let audit = MySqlAuditLog::new(DatabaseConfig {
            host: "127.0.0.1".into(),
            port: 1,
            name: "rfid_attendance".into(),
            user: "root".into(),
            password: String::new(),
        });
        let record = BackupRecord::success(Trigger::Manual, "x.sql.zip".into(), ts());
        let err = audit.record(&record).await.unwrap_err();
        assert!(matches!(err, BackupError::Connection(_)));
    }
}
