//! Automated backup tool for the RFID attendance database
//!
//! Provides CLI interface for manual backups, listing, restore extraction and
//! the daily automated backup service

// attendance-backup/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use anyhow::{Context, Result};
use backup::{BackupService, Trigger};
use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use utils::format_file_size;

#[derive(Parser, Debug)]
#[command(name = "attendance-backup", version, about = "Database backups for the attendance system")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "BACKUP_CONFIG", default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a manual backup now
    Backup,
    /// List compressed backups, newest first
    List,
    /// Run the daily automated backup until interrupted
    Serve,
    /// Unpack a backup archive so it can be replayed with the mysql client
    Extract {
        archive: PathBuf,
        /// Directory to write the .sql file into
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
    },
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    utils::init_logging(cli.verbose);

    match run_app(cli).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;

    match cli.command {
        Command::Backup => {
            let service = BackupService::from_config(&app_config)?;
            let report = service
                .run_backup(Trigger::Manual)
                .await
                .context("Backup process failed")?;
            println!(
                "{} backup created: {} ({})",
                report.trigger,
                report.archive_path.display(),
                format_file_size(report.archive_size)
            );
            if report.retention.deleted_count() > 0 {
                println!("Removed {} old backup(s)", report.retention.deleted_count());
            }
        }
        Command::List => {
            let service = BackupService::from_config(&app_config)?;
            let entries = service.list_backups();
            if entries.is_empty() {
                println!(
                    "No backups found in {}",
                    app_config.backup.directory.display()
                );
            }
            for entry in entries {
                println!(
                    "{:<50} {:>10}  {}",
                    entry.name,
                    format_file_size(entry.size),
                    entry.modified.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Serve => {
            let service = BackupService::from_config(&app_config)?;
            if !service.start_automated_backup() {
                anyhow::bail!("Automated backup is disabled (backup.enabled = false)");
            }
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown requested");
            if service.is_automated_backup_running() {
                service.stop_automated_backup();
            }
        }
        Command::Extract { archive, output } => {
            let sql_path = backup::archive::extract_dump(&archive, &output)?;
            println!("Extracted {}", sql_path.display());
            println!(
                "Restore with: mysql -u {} -p {} < {}",
                app_config.database.user,
                app_config.database.name,
                sql_path.display()
            );
        }
    }
    Ok(())
}
