//! Bounded in-memory log buffers polled by the status surface.
//!
//! Each buffer keeps the most recent `capacity` lines. Lines carry an
//! absolute sequence number, so a reader's offset stays meaningful after
//! older lines have been evicted.

use log::Level;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to a ring log
pub type SharedLog = Arc<RingLog>;

/// Contiguous suffix of a ring log starting at a reader-supplied offset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogTail {
    pub lines: Vec<String>,
    /// Offset to pass on the next poll
    pub next_offset: u64,
}

#[derive(Debug, Default)]
struct Inner {
    lines: VecDeque<String>,
    /// Sequence number the next pushed line will get
    next_seq: u64,
}

/// Fixed-capacity, lock-protected line buffer
#[derive(Debug)]
pub struct RingLog {
    name: &'static str,
    capacity: usize,
    max_line_len: usize,
    inner: Mutex<Inner>,
}

impl RingLog {
    pub fn new(name: &'static str, capacity: usize, max_line_len: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            max_line_len: max_line_len.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn shared(name: &'static str, capacity: usize, max_line_len: usize) -> SharedLog {
        Arc::new(Self::new(name, capacity, max_line_len))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the deque inconsistent
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a raw line, truncating it and evicting the oldest line when full
    pub fn push(&self, line: impl Into<String>) {
        let mut line = line.into();
        if let Some((idx, _)) = line.char_indices().nth(self.max_line_len) {
            line.truncate(idx);
        }

        let mut inner = self.lock();
        if inner.lines.len() == self.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back(line);
        inner.next_seq += 1;
    }

    /// Forward to the `log` facade and keep a timestamped copy in the buffer
    pub fn record(&self, level: Level, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::log!(target: self.name, level, "{}", message);
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        self.push(format!("[{}] {:<5} {}", stamp, level, message));
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.record(Level::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.record(Level::Warn, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.record(Level::Error, message);
    }

    /// Snapshot up to `limit` lines starting at `offset`.
    ///
    /// Offsets older than the oldest retained line start at the oldest line;
    /// offsets past the end return nothing.
    pub fn tail(&self, offset: u64, limit: usize) -> LogTail {
        let inner = self.lock();
        let first_seq = inner.next_seq - inner.lines.len() as u64;
        let start = offset.clamp(first_seq, inner.next_seq);
        let skip = (start - first_seq) as usize;

        let lines: Vec<String> = inner.lines.iter().skip(skip).take(limit).cloned().collect();
        let next_offset = start + lines.len() as u64;
        LogTail { lines, next_offset }
    }

    /// Number of lines currently retained
    pub fn len(&self) -> usize {
        self.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
