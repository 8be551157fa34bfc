//! Log Rotation and Archive Management
//!
//! Provides functionality for:
//! - Archiving the active log once it outgrows the configured size
//! - Naming archives by the offset range they hold
//! - Listing archived segments in append order

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};

/// Log rotation manager for stream segments
pub struct LogRotation {
    config: StreamConfig,
}

impl LogRotation {
    /// Create a new LogRotation manager
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    /// Move the active log into the archive directory
    ///
    /// The next append starts a fresh active file. Offsets are untouched.
    ///
    /// # Arguments
    /// * `last_offset` - The offset of the last event in the active log
    ///
    /// # Returns
    /// * `Ok(Some(path))` - Path to the archive file if rotation occurred
    /// * `Ok(None)` - Nothing to rotate (missing or empty active log)
    pub fn rotate(&self, last_offset: u64) -> StreamResult<Option<PathBuf>> {
        let active = &self.config.stream_path;
        let size = match fs::metadata(active) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StreamError::io_at("stat", active, e)),
        };
        if size == 0 {
            return Ok(None);
        }

        let archive_dir = self.config.archive_dir();
        fs::create_dir_all(&archive_dir)
            .map_err(|e| StreamError::io_at("create directory", &archive_dir, e))?;

        let first_offset = first_offset(active)?.unwrap_or(last_offset);
        let archive_path = archive_dir.join(format!(
            "{}_{}_to_{}.jsonl",
            self.config.segment_stem(),
            first_offset,
            last_offset
        ));
        if archive_path.exists() {
            return Err(StreamError::io_at(
                "archive to",
                &archive_path,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "archive already exists"),
            ));
        }

        fs::rename(active, &archive_path)
            .map_err(|e| StreamError::io_at("archive", active, e))?;

        info!(
            archive = %archive_path.display(),
            first_offset,
            last_offset,
            size_bytes = size,
            "rotated active log"
        );

        Ok(Some(archive_path))
    }

    /// List archived segments belonging to this log, oldest first
    pub fn list_archives(&self) -> StreamResult<Vec<ArchiveInfo>> {
        let archive_dir = self.config.archive_dir();

        if !archive_dir.exists() {
            return Ok(Vec::new());
        }

        let stem = self.config.segment_stem();
        let mut archives = Vec::new();

        let entries = fs::read_dir(&archive_dir)
            .map_err(|e| StreamError::io_at("list", &archive_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StreamError::io_at("list", &archive_dir, e))?;
            let path = entry.path();

            let Some((first_offset, last_offset)) = parse_archive_name(&path, &stem) else {
                continue;
            };
            let size = entry
                .metadata()
                .map_err(|e| StreamError::io_at("stat", &path, e))?
                .len();

            archives.push(ArchiveInfo {
                path,
                size,
                first_offset,
                last_offset,
            });
        }

        archives.sort_by_key(|a| (a.first_offset, a.last_offset));

        Ok(archives)
    }

    /// Get total size of all archives in bytes
    pub fn total_archive_size(&self) -> StreamResult<u64> {
        let archives = self.list_archives()?;
        Ok(archives.iter().map(|a| a.size).sum())
    }
}

/// Offset of the first parseable record in a segment
fn first_offset(path: &Path) -> StreamResult<Option<u64>> {
    let file = File::open(path).map_err(|e| StreamError::io_at("open", path, e))?;
    let reader = BufReader::new(file);

    for line in reader.split(b'\n') {
        let line = line.map_err(|e| StreamError::io_at("read", path, e))?;
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(&line) else {
            continue;
        };
        if let Some(offset) = value.pointer("/metadata/offset").and_then(|v| v.as_u64()) {
            return Ok(Some(offset));
        }
    }
    Ok(None)
}

/// Parse `<stem>_<first>_to_<last>.jsonl`
fn parse_archive_name(path: &Path, stem: &str) -> Option<(u64, u64)> {
    if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
        return None;
    }
    let name = path.file_stem()?.to_str()?;
    let range = name.strip_prefix(stem)?.strip_prefix('_')?;
    let (first, last) = range.split_once("_to_")?;
    Some((first.parse().ok()?, last.parse().ok()?))
}

/// Information about an archived segment
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// Path to the archive file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Offset of the first event in the archive
    pub first_offset: u64,
    /// Offset of the last event in the archive
    pub last_offset: u64,
}

impl ArchiveInfo {
    /// Number of events the offset range covers
    pub fn event_count(&self) -> u64 {
        self.last_offset.saturating_sub(self.first_offset) + 1
    }
}
