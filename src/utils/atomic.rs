//! Atomic file operations
//!
//! Used for the auxiliary JSON mirrors (pending checkpoints, latest snapshot
//! per session). The log itself is append-only and never rewritten.
//!
//! # Pattern
//!
//! 1. Write to a temporary file (.tmp)
//! 2. Call sync_all() to flush to disk
//! 3. Rename temp file to final path (atomic on most filesystems)
//!
//! A reader sees either the previous version or the new one, never a
//! partially written file.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::error::{StreamError, StreamResult};

/// Atomically replace `path` with `content`
///
/// # Example
///
/// ```ignore
/// atomic_write("data/checkpoints.json", "[]")?;
/// ```
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &str) -> StreamResult<()> {
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| StreamError::io_at("create directory", parent, e))?;
        }
    }

    let written = File::create(&temp_path).and_then(|mut file| {
        file.write_all(content.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(StreamError::io_at("write", &temp_path, e));
    }

    fs::rename(&temp_path, path).map_err(|e| StreamError::io_at("rename", &temp_path, e))
}

/// Atomically replace `path` with the pretty-printed JSON form of `value`
pub fn atomic_write_json<P: AsRef<Path>, T: Serialize + ?Sized>(
    path: P,
    value: &T,
) -> StreamResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    atomic_write(path, &content)
}

/// Remove `.tmp` files left behind by an interrupted mirror write
///
/// Returns the number of files removed. A missing directory counts as clean.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> StreamResult<usize> {
    let dir = dir.as_ref();
    let mut cleaned = 0;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StreamError::io_at("list", dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| StreamError::io_at("list", dir, e))?;
        let path = entry.path();

        if path.extension().map(|e| e == "tmp").unwrap_or(false) {
            fs::remove_file(&path).map_err(|e| StreamError::io_at("remove", &path, e))?;
            debug!(path = %path.display(), "removed stale temp file");
            cleaned += 1;
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pending.json");

        atomic_write(&path, "[]").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_atomic_write_replaces_and_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("s1.json");

        atomic_write_json(&path, &json!({"phase": "planning"})).unwrap();
        atomic_write_json(&path, &json!({"phase": "review"})).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["phase"], "review");
    }

    #[test]
    fn test_cleanup_temp_files() {
        let temp_dir = TempDir::new().unwrap();

        fs::write(temp_dir.path().join("s1.tmp"), "partial").unwrap();
        fs::write(temp_dir.path().join("s2.tmp"), "partial").unwrap();
        fs::write(temp_dir.path().join("s1.json"), "{}").unwrap();

        assert_eq!(cleanup_temp_files(temp_dir.path()).unwrap(), 2);
        assert!(!temp_dir.path().join("s1.tmp").exists());
        assert!(temp_dir.path().join("s1.json").exists());

        assert_eq!(cleanup_temp_files(temp_dir.path().join("missing")).unwrap(), 0);
    }
}
