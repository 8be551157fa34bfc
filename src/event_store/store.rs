//! Event Store - the durability boundary
//!
//! The EventStore owns the physical log. Each append validates the raw
//! event, assigns id/timestamp/offset, and writes one self-contained JSON
//! line while holding an exclusive advisory lock on the file.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::config::StreamConfig;
use crate::error::{StreamError, StreamResult};
use crate::types::{NewEvent, StreamEvent};

use super::offset::OffsetTracker;
use super::reader::LogReader;
use super::rotation::LogRotation;

/// The EventStore manages the append-only log and its segments
pub struct EventStore {
    config: StreamConfig,
    offsets: Arc<OffsetTracker>,
    rotation: LogRotation,
    /// A previous write may have left a torn line behind
    needs_tail_repair: bool,
}

impl EventStore {
    /// Open the store, creating the log directory and repairing a torn tail
    pub fn open(config: StreamConfig) -> StreamResult<Self> {
        config.validate()?;
        if let Some(parent) = config.stream_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| StreamError::io_at("create directory", parent, e))?;
            }
        }

        let mut store = Self {
            rotation: LogRotation::new(config.clone()),
            config,
            offsets: Arc::new(OffsetTracker::new()),
            needs_tail_repair: true,
        };
        store.repair_tail()?;
        Ok(store)
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn active_path(&self) -> &Path {
        &self.config.stream_path
    }

    /// Shared handle to the offset counter
    pub fn offsets(&self) -> Arc<OffsetTracker> {
        Arc::clone(&self.offsets)
    }

    pub fn current_offset(&self) -> u64 {
        self.offsets.current()
    }

    pub fn rotation(&self) -> &LogRotation {
        &self.rotation
    }

    /// Append an event to the log
    ///
    /// Validation happens before any write. The offset is only consumed
    /// once the line is on disk.
    pub fn append(&mut self, event: NewEvent) -> StreamResult<StreamEvent> {
        event.validate()?;

        let offset = self.offsets.peek_next();
        let event = event.into_event(uuid::Uuid::new_v4().to_string(), Utc::now(), offset);
        let mut line = event.to_json_line()?;
        line.push('\n');

        if self.needs_tail_repair {
            self.repair_tail()?;
        }
        if let Err(e) = self.write_line(line.as_bytes()) {
            self.needs_tail_repair = true;
            return Err(e);
        }
        let assigned = self.offsets.advance();
        debug_assert_eq!(assigned, offset);
        debug!(offset, event_type = %event.event_type, session_id = %event.session_id, "appended event");

        self.maybe_rotate();
        Ok(event)
    }

    /// Every persisted event, oldest segment first
    ///
    /// The returned reader is consumed as it is iterated.
    pub fn read_all(&self) -> StreamResult<LogReader> {
        let mut segments: Vec<PathBuf> = self
            .rotation
            .list_archives()?
            .into_iter()
            .map(|a| a.path)
            .collect();
        segments.push(self.config.stream_path.clone());
        Ok(LogReader::new(segments))
    }

    /// Adopt the offset reached by recovery
    pub(crate) fn restore_offset(&self, offset: u64) {
        self.offsets.restore(offset);
    }

    fn write_line(&self, bytes: &[u8]) -> StreamResult<()> {
        let path = &self.config.stream_path;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StreamError::io_at("open", path, e))?;

        lock_exclusive(&file).map_err(|e| StreamError::io_at("lock", path, e))?;
        let written = file
            .write_all(bytes)
            .and_then(|_| if self.config.fsync { file.sync_data() } else { Ok(()) });
        // Closing the descriptor releases the lock too; unlock explicitly so
        // the lock never outlives the write.
        if let Err(e) = unlock(&file) {
            warn!(path = %path.display(), error = %e, "failed to release log lock");
        }
        written.map_err(|e| StreamError::io_at("append to", path, e))
    }

    /// Terminate a torn final line so the next record starts on its own line
    fn repair_tail(&mut self) -> StreamResult<()> {
        let path = self.config.stream_path.clone();
        let mut file = match OpenOptions::new().read(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.needs_tail_repair = false;
                return Ok(());
            }
            Err(e) => return Err(StreamError::io_at("open", &path, e)),
        };

        let len = file
            .metadata()
            .map_err(|e| StreamError::io_at("stat", &path, e))?
            .len();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::Start(len - 1))
                .and_then(|_| file.read_exact(&mut last))
                .map_err(|e| StreamError::io_at("read", &path, e))?;
            if last[0] != b'\n' {
                warn!(path = %path.display(), "active log ends with a torn record; terminating it");
                lock_exclusive(&file).map_err(|e| StreamError::io_at("lock", &path, e))?;
                let repaired = file.write_all(b"\n").and_then(|_| file.sync_data());
                let _ = unlock(&file);
                repaired.map_err(|e| StreamError::io_at("repair", &path, e))?;
            }
        }
        self.needs_tail_repair = false;
        Ok(())
    }

    fn maybe_rotate(&self) {
        let size = match fs::metadata(&self.config.stream_path) {
            Ok(meta) => meta.len(),
            Err(_) => return,
        };
        if size <= self.config.max_stream_bytes {
            return;
        }
        // The event is already durable; a failed rotation is retried on the
        // next append rather than failing this one.
        if let Err(e) = self.rotation.rotate(self.offsets.current()) {
            error!(error = %e, "log rotation failed");
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    rustix::fs::flock(file, rustix::fs::FlockOperation::LockExclusive).map_err(Into::into)
}

#[cfg(unix)]
fn unlock(file: &File) -> std::io::Result<()> {
    rustix::fs::flock(file, rustix::fs::FlockOperation::Unlock).map_err(Into::into)
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::LogRecord;
    use crate::types::EventType;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (EventStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StreamConfig::new(temp_dir.path().join("stream.jsonl")).with_fsync(false);
        let store = EventStore::open(config).unwrap();
        (store, temp_dir)
    }

    fn session_created(session: &str) -> NewEvent {
        NewEvent::new(EventType::SessionCreated, session, json!({}))
    }

    fn events(store: &EventStore) -> Vec<StreamEvent> {
        store
            .read_all()
            .unwrap()
            .filter_map(|r| match r.unwrap() {
                LogRecord::Event(e) => Some(e),
                LogRecord::Corrupt(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_append_assigns_offsets() {
        let (mut store, _temp_dir) = create_test_store();

        let e1 = store.append(session_created("s1")).unwrap();
        let e2 = store
            .append(
                NewEvent::new(
                    EventType::AgentSpawned,
                    "s1",
                    json!({"agentName": "coder", "task": "fix bug"}),
                )
                .with_agent("planner"),
            )
            .unwrap();

        assert_eq!(e1.offset(), 1);
        assert_eq!(e2.offset(), 2);
        assert_ne!(e1.id, e2.id);
        assert_eq!(store.current_offset(), 2);

        let loaded = events(&store);
        assert_eq!(loaded, vec![e1, e2]);
    }

    #[test]
    fn test_invalid_event_writes_nothing() {
        let (mut store, temp_dir) = create_test_store();

        let err = store
            .append(NewEvent::new(EventType::SessionCreated, "", json!({})))
            .unwrap_err();
        assert!(matches!(err, StreamError::Validation(_)));
        assert_eq!(store.current_offset(), 0);
        assert!(!temp_dir.path().join("stream.jsonl").exists());
    }

    #[test]
    fn test_one_record_per_line() {
        let (mut store, temp_dir) = create_test_store();
        for i in 0..3 {
            store.append(session_created(&format!("s{}", i))).unwrap();
        }

        let content = fs::read_to_string(temp_dir.path().join("stream.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn test_torn_tail_is_terminated_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stream.jsonl");
        let config = StreamConfig::new(&path).with_fsync(false);
        {
            let mut store = EventStore::open(config.clone()).unwrap();
            store.append(session_created("s1")).unwrap();
        }
        // Simulate a crash mid-write
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"torn").unwrap();
        drop(file);

        let mut store = EventStore::open(config).unwrap();
        store.restore_offset(1);
        let e2 = store.append(session_created("s2")).unwrap();
        assert_eq!(e2.offset(), 2);

        let records: Vec<_> = store.read_all().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[1], LogRecord::Corrupt(_)));
        assert!(matches!(&records[2], LogRecord::Event(e) if e.session_id == "s2"));
    }

    #[test]
    fn test_rotation_keeps_offsets_increasing() {
        let temp_dir = TempDir::new().unwrap();
        let config = StreamConfig::new(temp_dir.path().join("stream.jsonl"))
            .with_fsync(false)
            .with_max_stream_bytes(400);
        let mut store = EventStore::open(config).unwrap();

        for i in 0..20 {
            store.append(session_created(&format!("session-{}", i))).unwrap();
        }

        let archives = store.rotation().list_archives().unwrap();
        assert!(!archives.is_empty());

        let offsets: Vec<u64> = events(&store).iter().map(|e| e.offset()).collect();
        assert_eq!(offsets, (1..=20).collect::<Vec<_>>());
    }
}
