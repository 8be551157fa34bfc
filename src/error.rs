//! Error taxonomy for the event stream
//!
//! Durability failures (`Io`, `Serialization`) are fatal to the triggering
//! call. Input problems (`Validation`) are raised before anything is written.
//! Benign conflicts such as resolving an already-resolved checkpoint are not
//! errors at all; they surface as `false` / `None`.

use std::path::Path;

use thiserror::Error;

/// Result type for event stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur in event stream operations
#[derive(Debug, Error)]
pub enum StreamError {
    /// Log write/read failure (disk full, permission denied, lock unavailable)
    #[error("IO error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded for the log
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed input, rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    /// Too many checkpoints are pending at once
    #[error("Checkpoint capacity reached: {max} pending checkpoints")]
    CheckpointCapacity { max: usize },

    /// The operation belongs to a workflow switched off in configuration
    #[error("Feature disabled: {0}")]
    FeatureDisabled(&'static str),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// Wrap an IO error with a short description of what was being done
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StreamError::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an IO error that happened on a specific path
    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("{} {}", action, path.display()), source)
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        StreamError::Validation(msg.into())
    }

    /// True for errors that break the durability contract
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::Io { .. } | StreamError::Serialization(_))
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::io("io", e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display_includes_context() {
        let err = StreamError::io_at(
            "append to",
            Path::new("/tmp/stream.jsonl"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("append to /tmp/stream.jsonl"));
        assert!(msg.contains("denied"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_validation_is_not_fatal() {
        let err = StreamError::validation("options must not be empty");
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Validation error: options must not be empty"
        );
    }
}
