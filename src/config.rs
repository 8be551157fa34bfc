//! Configuration for the event stream
//!
//! Built either in code (`StreamConfig::new(path).with_*(..)`) or from
//! `STREAM_*` environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{StreamError, StreamResult};

const MB: u64 = 1024 * 1024;

/// Longest accepted checkpoint timeout (one year)
pub const MAX_CHECKPOINT_TIMEOUT_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Configuration for the event stream and its managers
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Path to the active log file
    pub stream_path: PathBuf,
    /// Optional mirror of the pending checkpoint set (JSON file)
    pub checkpoint_path: Option<PathBuf>,
    /// Optional directory mirroring the latest snapshot per session
    pub snapshot_path: Option<PathBuf>,
    /// Rotate the active log once it grows past this many bytes
    pub max_stream_bytes: u64,
    /// Maximum number of simultaneously pending checkpoints
    pub max_checkpoints: usize,
    /// Checkpoint expiry in milliseconds; 0 disables expiry
    pub checkpoint_timeout_ms: u64,
    /// Toggles snapshot capture/restore
    pub enable_context_preservation: bool,
    /// Toggles the checkpoint workflow
    pub enable_human_in_loop: bool,
    /// Capacity of the recent-history ring buffer
    pub history_capacity: usize,
    /// fsync the log after every append
    pub fsync: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_path: PathBuf::from("data/stream.jsonl"),
            checkpoint_path: None,
            snapshot_path: None,
            max_stream_bytes: 10 * MB,
            max_checkpoints: 100,
            checkpoint_timeout_ms: 300_000,
            enable_context_preservation: true,
            enable_human_in_loop: true,
            history_capacity: 1000,
            fsync: true,
        }
    }
}

impl StreamConfig {
    /// Create config with a custom active log path
    pub fn new<P: AsRef<Path>>(stream_path: P) -> Self {
        Self {
            stream_path: stream_path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load configuration from `STREAM_*` environment variables
    pub fn from_env() -> StreamResult<Self> {
        let mut config = Self::default();

        if let Ok(path) = env::var("STREAM_PATH") {
            config.stream_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("STREAM_CHECKPOINT_PATH") {
            config.checkpoint_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = env::var("STREAM_SNAPSHOT_PATH") {
            config.snapshot_path = Some(PathBuf::from(path));
        }
        if let Some(mb) = parse_env::<u64>("STREAM_MAX_SIZE_MB")? {
            config.max_stream_bytes = mb * MB;
        }
        if let Some(max) = parse_env("STREAM_MAX_CHECKPOINTS")? {
            config.max_checkpoints = max;
        }
        if let Some(ms) = parse_env("STREAM_CHECKPOINT_TIMEOUT_MS")? {
            config.checkpoint_timeout_ms = ms;
        }
        if let Some(flag) = parse_env("STREAM_ENABLE_CONTEXT")? {
            config.enable_context_preservation = flag;
        }
        if let Some(flag) = parse_env("STREAM_ENABLE_HITL")? {
            config.enable_human_in_loop = flag;
        }
        if let Some(cap) = parse_env("STREAM_HISTORY_CAPACITY")? {
            config.history_capacity = cap;
        }
        if let Some(flag) = parse_env("STREAM_FSYNC")? {
            config.fsync = flag;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> StreamResult<()> {
        if self.stream_path.as_os_str().is_empty() {
            return Err(StreamError::Config("stream_path must not be empty".into()));
        }
        if self.max_stream_bytes == 0 {
            return Err(StreamError::Config(
                "max stream size must be greater than zero".into(),
            ));
        }
        if self.max_checkpoints == 0 {
            return Err(StreamError::Config(
                "max_checkpoints must be greater than zero".into(),
            ));
        }
        if self.checkpoint_timeout_ms > MAX_CHECKPOINT_TIMEOUT_MS {
            return Err(StreamError::Config(format!(
                "checkpoint timeout {}ms exceeds the {}ms maximum",
                self.checkpoint_timeout_ms, MAX_CHECKPOINT_TIMEOUT_MS
            )));
        }
        Ok(())
    }

    pub fn with_checkpoint_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.checkpoint_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_snapshot_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_max_stream_size_mb(mut self, mb: u64) -> Self {
        self.max_stream_bytes = mb * MB;
        self
    }

    /// Byte-level rotation threshold (mostly for tests)
    pub fn with_max_stream_bytes(mut self, bytes: u64) -> Self {
        self.max_stream_bytes = bytes;
        self
    }

    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = max;
        self
    }

    pub fn with_checkpoint_timeout_ms(mut self, ms: u64) -> Self {
        self.checkpoint_timeout_ms = ms;
        self
    }

    pub fn with_context_preservation(mut self, enabled: bool) -> Self {
        self.enable_context_preservation = enabled;
        self
    }

    pub fn with_human_in_loop(mut self, enabled: bool) -> Self {
        self.enable_human_in_loop = enabled;
        self
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Checkpoint expiry, or `None` when disabled
    pub fn checkpoint_timeout(&self) -> Option<Duration> {
        (self.checkpoint_timeout_ms > 0).then(|| Duration::from_millis(self.checkpoint_timeout_ms))
    }

    /// Directory holding rotated segments
    pub fn archive_dir(&self) -> PathBuf {
        self.stream_path
            .parent()
            .map(|p| p.join("archive"))
            .unwrap_or_else(|| PathBuf::from("archive"))
    }

    /// File stem used to name archived segments
    pub fn segment_stem(&self) -> String {
        self.stream_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stream".to_string())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> StreamResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| StreamError::Config(format!("invalid value for {}: {:?}", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.max_stream_bytes, 10 * MB);
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.checkpoint_timeout(), Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_disables_expiry() {
        let config = StreamConfig::new("x/stream.jsonl").with_checkpoint_timeout_ms(0);
        assert!(config.checkpoint_timeout().is_none());
    }

    #[test]
    fn test_archive_dir_sits_next_to_log() {
        let config = StreamConfig::new("/var/lib/agents/events.jsonl");
        assert_eq!(config.archive_dir(), PathBuf::from("/var/lib/agents/archive"));
        assert_eq!(config.segment_stem(), "events");
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = StreamConfig::new("s.jsonl").with_max_checkpoints(0);
        assert!(matches!(config.validate(), Err(StreamError::Config(_))));
    }

    #[test]
    fn test_validate_bounds_checkpoint_timeout() {
        let config = StreamConfig::new("s.jsonl").with_checkpoint_timeout_ms(MAX_CHECKPOINT_TIMEOUT_MS);
        assert!(config.validate().is_ok());

        let config = StreamConfig::new("s.jsonl").with_checkpoint_timeout_ms(10_000_000_000_000_000);
        assert!(matches!(config.validate(), Err(StreamError::Config(_))));
    }
}
