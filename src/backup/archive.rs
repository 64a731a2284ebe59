// attendance-backup/src/backup/archive.rs
use anyhow::Context;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::{BackupError, Result};
use crate::utils::format_file_size;

pub const ARCHIVE_EXTENSION: &str = "zip";

/// `backups/x.sql` -> `backups/x.sql.zip`
pub fn archive_path_for(source_path: &Path) -> PathBuf {
    let mut name = source_path.as_os_str().to_owned();
    name.push(".");
    name.push(ARCHIVE_EXTENSION);
    PathBuf::from(name)
}

/// Wraps a dump file into a single-entry zip next to it and removes the dump.
///
/// The archive is staged in a temporary file in the same directory and renamed
/// into place once complete, so the final path only ever holds a whole archive.
/// The source is removed only after that rename succeeded; on any failure it is
/// left untouched and the staging file is discarded.
pub fn compress_dump(source_path: &Path) -> Result<PathBuf> {
    let fail = |message: String| BackupError::Compression {
        path: source_path.to_path_buf(),
        message,
    };

    if !source_path.is_file() {
        return Err(fail("backup file not found".to_string()));
    }
    let entry_name = source_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| fail("backup file name is not valid UTF-8".to_string()))?
        .to_string();
    let archive_path = archive_path_for(source_path);
    let parent = source_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let staging = tempfile::Builder::new()
        .prefix(".")
        .suffix(".zip.partial")
        .tempfile_in(parent)
        .map_err(|e| fail(format!("failed to create staging file: {}", e)))?;

    let mut source = File::open(source_path)
        .map_err(|e| fail(format!("failed to open backup file: {}", e)))?;
    let source_len = source.metadata().map(|m| m.len()).unwrap_or(0);

    let mut zip = ZipWriter::new(staging.as_file());
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(source_len >= u32::MAX as u64);
    zip.start_file(entry_name.as_str(), options)
        .map_err(|e| fail(format!("failed to add {} to archive: {}", entry_name, e)))?;
    io::copy(&mut source, &mut zip)
        .map_err(|e| fail(format!("failed to write archive entry: {}", e)))?;
    zip.finish()
        .map_err(|e| fail(format!("failed to finalize archive: {}", e)))?;
    staging
        .as_file()
        .sync_all()
        .map_err(|e| fail(format!("failed to flush archive: {}", e)))?;

    staging
        .persist(&archive_path)
        .map_err(|e| fail(format!("failed to move archive into {}: {}", archive_path.display(), e.error)))?;

    if let Err(e) = fs::remove_file(source_path) {
        tracing::warn!(
            path = %source_path.display(),
            error = %e,
            "Archive written but the uncompressed dump could not be removed"
        );
    }

    let archive_size = fs::metadata(&archive_path).map(|m| m.len()).unwrap_or(0);
    tracing::info!(
        archive = %archive_path.display(),
        original = %format_file_size(source_len),
        compressed = %format_file_size(archive_size),
        "Backup compressed"
    );
    Ok(archive_path)
}

/// Extracts the single dump entry of an archive into `extract_to_dir`.
///
/// Returns the path of the extracted `.sql` file.
pub fn extract_dump(archive_path: &Path, extract_to_dir: &Path) -> anyhow::Result<PathBuf> {
    if !archive_path.is_file() {
        anyhow::bail!("Archive for extraction is not a file: {}", archive_path.display());
    }
    fs::create_dir_all(extract_to_dir).with_context(|| {
        format!(
            "Failed to create extraction directory: {}",
            extract_to_dir.display()
        )
    })?;

    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(archive_file)
        .with_context(|| format!("Not a valid zip archive: {}", archive_path.display()))?;
    if archive.len() != 1 {
        anyhow::bail!(
            "Expected exactly one entry in {}, found {}",
            archive_path.display(),
            archive.len()
        );
    }

    let mut entry = archive
        .by_index(0)
        .with_context(|| format!("Failed to read entry of {}", archive_path.display()))?;
    // Only the base name is honoured so an entry can never escape the target directory.
    let entry_name = entry
        .enclosed_name()
        .and_then(|p| p.file_name().map(|n| n.to_owned()))
        .with_context(|| format!("Archive entry has an unsafe name: {}", entry.name()))?;

    let output_path = extract_to_dir.join(entry_name);
    let mut output = File::create(&output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    io::copy(&mut entry, &mut output)
        .with_context(|| format!("Failed to extract to {}", output_path.display()))?;

    tracing::info!(
        archive = %archive_path.display(),
        output = %output_path.display(),
        "Backup extracted"
    );
    Ok(output_path)
}
