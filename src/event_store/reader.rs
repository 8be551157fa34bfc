//! Sequential reader over every log segment
//!
//! Yields each non-blank line of each segment, in append order, as either a
//! parsed [`StreamEvent`] or a [`CorruptLine`]. The reader is consumed as it
//! goes; open a new one to read again.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use crate::error::{StreamError, StreamResult};
use crate::types::StreamEvent;

/// One line of the log
#[derive(Debug, Clone)]
pub enum LogRecord {
    Event(StreamEvent),
    Corrupt(CorruptLine),
}

/// A line that could not be decoded as an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptLine {
    pub segment: PathBuf,
    /// 1-based line number within the segment
    pub line: usize,
    pub error: String,
    /// Last record of the whole log, the signature of a crash mid-write
    pub trailing: bool,
}

struct RawLine {
    number: usize,
    bytes: Vec<u8>,
}

struct SegmentCursor {
    path: PathBuf,
    reader: BufReader<File>,
    line_no: usize,
    peeked: Option<RawLine>,
}

impl SegmentCursor {
    fn open(path: PathBuf) -> StreamResult<Option<Self>> {
        match File::open(&path) {
            Ok(file) => Ok(Some(Self {
                path,
                reader: BufReader::new(file),
                line_no: 0,
                peeked: None,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StreamError::io_at("open", &path, e)),
        }
    }

    /// Next non-blank line
    fn read_line(&mut self) -> StreamResult<Option<RawLine>> {
        if let Some(line) = self.peeked.take() {
            return Ok(Some(line));
        }
        loop {
            let mut buf = Vec::new();
            let n = self
                .reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| StreamError::io_at("read", &self.path, e))?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if buf.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Ok(Some(RawLine {
                number: self.line_no,
                bytes: buf,
            }));
        }
    }

    fn has_more(&mut self) -> StreamResult<bool> {
        if self.peeked.is_none() {
            self.peeked = self.read_line()?;
        }
        Ok(self.peeked.is_some())
    }
}

/// Finite, non-restartable iterator over all persisted records
pub struct LogReader {
    pending: VecDeque<PathBuf>,
    current: Option<SegmentCursor>,
    failed: bool,
}

impl LogReader {
    pub(crate) fn new(segments: Vec<PathBuf>) -> Self {
        Self {
            pending: segments.into(),
            current: None,
            failed: false,
        }
    }

    fn next_record(&mut self) -> StreamResult<Option<LogRecord>> {
        loop {
            if self.current.is_none() {
                let Some(path) = self.pending.pop_front() else {
                    return Ok(None);
                };
                self.current = SegmentCursor::open(path)?;
                continue;
            }

            let Some(cursor) = self.current.as_mut() else {
                continue;
            };
            let Some(raw) = cursor.read_line()? else {
                self.current = None;
                continue;
            };

            let parsed = std::str::from_utf8(&raw.bytes)
                .map_err(|e| e.to_string())
                .and_then(|text| StreamEvent::from_json_line(text.trim()).map_err(|e| e.to_string()));

            return match parsed {
                Ok(event) => Ok(Some(LogRecord::Event(event))),
                Err(error) => {
                    let segment = cursor.path.clone();
                    let trailing = !cursor.has_more()? && self.remaining_segments_empty()?;
                    Ok(Some(LogRecord::Corrupt(CorruptLine {
                        segment,
                        line: raw.number,
                        error,
                        trailing,
                    })))
                }
            };
        }
    }

    /// True when no later segment holds a record
    fn remaining_segments_empty(&self) -> StreamResult<bool> {
        for path in &self.pending {
            if let Some(mut cursor) = SegmentCursor::open(path.clone())? {
                if cursor.has_more()? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl Iterator for LogReader {
    type Item = StreamResult<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
