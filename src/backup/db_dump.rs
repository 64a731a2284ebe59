// attendance-backup/src/backup/db_dump.rs
use async_trait::async_trait;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::Exporter;
use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};
use crate::utils::{find_executable, format_file_size};

/// A subprocess invocation whose standard output goes to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdout_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Port for running external tools, so the exporter's failure path is a value.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs the command as an OS process and waits for it to exit.
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let program = find_executable(&spec.program)?;
        tracing::debug!(program = %program.display(), "Found dump executable");

        let stdout = File::create(&spec.stdout_path)?;
        // No timeout: an unresponsive tool stalls the run.
        let child = Command::new(&program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BackupError::ToolUnavailable(format!("failed to execute {}: {}", program.display(), e))
            })?;
        let output = child.wait_with_output().await.map_err(|e| {
            BackupError::ToolUnavailable(format!("failed waiting for {}: {}", program.display(), e))
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Primary exporter: `mysqldump` with stdout redirected to the target file.
pub struct MySqlDumpExporter<R = ProcessRunner> {
    database: DatabaseConfig,
    tool: String,
    runner: R,
}

impl MySqlDumpExporter<ProcessRunner> {
    pub fn new(database: DatabaseConfig, tool: String) -> Self {
        Self::with_runner(database, tool, ProcessRunner)
    }
}

impl<R: CommandRunner> MySqlDumpExporter<R> {
    pub fn with_runner(database: DatabaseConfig, tool: String, runner: R) -> Self {
        Self {
            database,
            tool,
            runner,
        }
    }

    /// The password travels on the command line and is visible in process listings.
    pub fn build_command(&self, target: &Path) -> CommandSpec {
        let db = &self.database;
        let mut args = vec![
            format!("-h{}", db.host),
            format!("-P{}", db.port),
            format!("-u{}", db.user),
        ];
        // A bare `-p` would make mysqldump prompt on the terminal.
        if !db.password.is_empty() {
            args.push(format!("-p{}", db.password));
        }
        args.extend(
            ["--databases", db.name.as_str(), "--routines", "--triggers", "--events"]
                .iter()
                .map(|s| s.to_string()),
        );

        CommandSpec {
            program: self.tool.clone(),
            args,
            stdout_path: target.to_path_buf(),
        }
    }
}

#[async_trait]
impl<R: CommandRunner> Exporter for MySqlDumpExporter<R> {
    fn name(&self) -> &'static str {
        "mysqldump"
    }

    async fn export(&self, target: &Path) -> Result<()> {
        let spec = self.build_command(target);
        tracing::info!(tool = %self.tool, database = %self.database.name, "Running dump tool");

        let output = self.runner.run(&spec).await?;
        if !output.success() {
            let status = output
                .exit_code
                .map_or_else(|| "a signal".to_string(), |c| format!("exit code {}", c));
            return Err(BackupError::ToolUnavailable(format!(
                "{} terminated with {}: {}",
                self.tool, status, output.stderr
            )));
        }

        let size = tokio::fs::metadata(target).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(BackupError::ToolUnavailable(format!(
                "{} exited successfully but wrote no output to {}",
                self.tool,
                target.display()
            )));
        }

        tracing::info!(size = %format_file_size(size), "mysqldump backup successful");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every invocation and plays back a scripted outcome.
    struct ScriptedRunner {
        exit_code: Option<i32>,
        output: &'static [u8],
        spawn_error: bool,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedRunner {
        fn new(exit_code: Option<i32>, output: &'static [u8]) -> Self {
            Self {
                exit_code,
                output,
                spawn_error: false,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            if self.spawn_error {
                return Err(BackupError::ToolUnavailable("mysqldump executable not found".into()));
            }
            std::fs::write(&spec.stdout_path, self.output)?;
            Ok(CommandOutput {
                exit_code: self.exit_code,
                stderr: "mysqldump: Got error: 1045: Access denied".into(),
            })
        }
    }

    fn database(password: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: "db.local".into(),
            port: 3306,
            name: "rfid_attendance".into(),
            user: "root".into(),
            password: password.into(),
        }
    }

    #[test]
    fn test_command_carries_connection_flags() {
        let exporter = MySqlDumpExporter::new(database("s3cret"), "mysqldump".into());
        let spec = exporter.build_command(Path::new("backups/out.sql"));

        assert_eq!(spec.program, "mysqldump");
        assert_eq!(
            spec.args,
            vec![
                "-hdb.local",
                "-P3306",
                "-uroot",
                "-ps3cret",
                "--databases",
                "rfid_attendance",
                "--routines",
                "--triggers",
                "--events",
            ]
        );
        assert_eq!(spec.stdout_path, PathBuf::from("backups/out.sql"));
    }

    #[test]
    fn test_empty_password_omits_flag() {
        let exporter = MySqlDumpExporter::new(database(""), "mysqldump".into());
        let spec = exporter.build_command(Path::new("out.sql"));
        assert!(!spec.args.iter().any(|a| a.starts_with("-p")));
    }

    #[tokio::test]
    async fn test_successful_dump() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("out.sql");
        let exporter = MySqlDumpExporter::with_runner(
            database(""),
            "mysqldump".into(),
            ScriptedRunner::new(Some(0), b"-- MySQL dump\nCREATE TABLE t (id INT);\n"),
        );

        exporter.export(&target).await.unwrap();

        assert!(std::fs::metadata(&target).unwrap().len() > 0);
        assert_eq!(exporter.runner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let temp = TempDir::new().unwrap();
        let exporter = MySqlDumpExporter::with_runner(
            database(""),
            "mysqldump".into(),
            ScriptedRunner::new(Some(2), b"-- partial"),
        );

        let err = exporter.export(&temp.path().join("out.sql")).await.unwrap_err();

        assert!(matches!(err, BackupError::ToolUnavailable(ref m) if m.contains("exit code 2")));
    }

    #[tokio::test]
    async fn test_empty_output_is_failure() {
        let temp = TempDir::new().unwrap();
        let exporter = MySqlDumpExporter::with_runner(
            database(""),
            "mysqldump".into(),
            ScriptedRunner::new(Some(0), b""),
        );

        let err = exporter.export(&temp.path().join("out.sql")).await.unwrap_err();

        assert!(matches!(err, BackupError::ToolUnavailable(_)));
    }

    #[tokio::test]
    async fn test_killed_process_is_failure() {
        let temp = TempDir::new().unwrap();
        let exporter = MySqlDumpExporter::with_runner(
            database(""),
            "mysqldump".into(),
            ScriptedRunner::new(None, b"-- dump"),
        );

        let err = exporter.export(&temp.path().join("out.sql")).await.unwrap_err();

        assert!(err.to_string().contains("a signal"));
    }

    #[tokio::test]
    async fn test_spawn_error_is_returned_not_raised() {
        let temp = TempDir::new().unwrap();
        let mut runner = ScriptedRunner::new(Some(0), b"");
        runner.spawn_error = true;
        let exporter = MySqlDumpExporter::with_runner(database(""), "mysqldump".into(), runner);

        let err = exporter.export(&temp.path().join("out.sql")).await.unwrap_err();

        assert!(matches!(err, BackupError::ToolUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_with_process_runner() {
        let temp = TempDir::new().unwrap();
        let exporter = MySqlDumpExporter::new(
            database(""),
            "definitely-not-mysqldump-91c2".into(),
        );

        let err = exporter.export(&temp.path().join("out.sql")).await.unwrap_err();

        assert!(matches!(err, BackupError::ToolUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_redirects_stdout() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("echo.sql");
        let spec = CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "printf 'SELECT 1;'; echo oops >&2; exit 3".into()],
            stdout_path: target.clone(),
        };

        let output = ProcessRunner.run(&spec).await.unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "oops");
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "SELECT 1;");
    }
}
