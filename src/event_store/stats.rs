//! Event Store Statistics
//!
//! Provides statistics about the stream including:
//! - Event counts by type
//! - Storage size of the active log and archives
//! - Corrupt line count

use std::collections::BTreeMap;
use std::fs;

use serde::Serialize;

use crate::error::{StreamError, StreamResult};
use crate::types::EventType;

use super::reader::LogRecord;
use super::store::EventStore;

/// Statistics about the stream
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    /// Events in all segments
    pub event_count: usize,
    /// Lines that failed to decode
    pub corrupt_lines: usize,
    /// Size of the active log in bytes
    pub active_log_size: u64,
    /// Total size of archives in bytes
    pub archive_size: u64,
    /// Number of archived segments
    pub archive_file_count: usize,
    /// Events by type across all segments
    pub events_by_type: BTreeMap<EventType, usize>,
    /// Highest offset assigned so far
    pub current_offset: u64,
}

impl StreamStats {
    /// Calculate total storage size
    pub fn total_size(&self) -> u64 {
        self.active_log_size + self.archive_size
    }

    /// Format size in human-readable format
    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

/// Collector for stream statistics
pub struct StatsCollector<'a> {
    store: &'a EventStore,
}

impl<'a> StatsCollector<'a> {
    pub fn new(store: &'a EventStore) -> Self {
        Self { store }
    }

    /// Collect all statistics (scans every segment)
    pub fn collect(&self) -> StreamResult<StreamStats> {
        let mut stats = StreamStats {
            current_offset: self.store.current_offset(),
            ..Default::default()
        };

        let active = self.store.active_path();
        stats.active_log_size = match fs::metadata(active) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(StreamError::io_at("stat", active, e)),
        };

        let archives = self.store.rotation().list_archives()?;
        stats.archive_file_count = archives.len();
        stats.archive_size = archives.iter().map(|a| a.size).sum();

        for record in self.store.read_all()? {
            match record? {
                LogRecord::Event(event) => {
                    stats.event_count += 1;
                    *stats.events_by_type.entry(event.event_type).or_insert(0) += 1;
                }
                LogRecord::Corrupt(_) => stats.corrupt_lines += 1,
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::types::NewEvent;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_collect_stats() {
        let temp_dir = TempDir::new().unwrap();
        let config = StreamConfig::new(temp_dir.path().join("stream.jsonl")).with_fsync(false);
        let mut store = EventStore::open(config).unwrap();

        store
            .append(NewEvent::new(EventType::SessionCreated, "s1", json!({})))
            .unwrap();
        store
            .append(NewEvent::new(EventType::SessionCreated, "s2", json!({})))
            .unwrap();
        store
            .append(NewEvent::new(
                EventType::AgentFailed,
                "s1",
                json!({"agentName": "coder", "error": "timeout"}),
            ))
            .unwrap();

        let stats = StatsCollector::new(&store).collect().unwrap();

        assert_eq!(stats.event_count, 3);
        assert_eq!(stats.current_offset, 3);
        assert_eq!(stats.corrupt_lines, 0);
        assert!(stats.active_log_size > 0);
        assert_eq!(stats.events_by_type.get(&EventType::SessionCreated), Some(&2));
        assert_eq!(stats.events_by_type.get(&EventType::AgentFailed), Some(&1));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(StreamStats::format_size(500), "500 B");
        assert_eq!(StreamStats::format_size(1024), "1.00 KB");
        assert_eq!(StreamStats::format_size(1536), "1.50 KB");
        assert_eq!(StreamStats::format_size(1048576), "1.00 MB");
        assert_eq!(StreamStats::format_size(1073741824), "1.00 GB");
    }
}
