//! Normalized events delivered to watcher consumers.

use std::fmt;
use std::path::{Path, PathBuf};

use bitflags::bitflags;

bitflags! {
    /// File operation carried by an [`Event`].
    ///
    /// A bitmask so a single notification can combine operations, although
    /// every event produced by [`NotifyBackend`](super::NotifyBackend)
    /// carries exactly one flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Op: u32 {
        const CREATE = 1 << 0;
        const WRITE = 1 << 1;
        const REMOVE = 1 << 2;
        const RENAME = 1 << 3;
        const CHMOD = 1 << 4;
    }
}

impl Op {
    /// True for operations that take a path away from its parent directory.
    pub fn is_removal(self) -> bool {
        self.intersects(Op::REMOVE | Op::RENAME)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }

        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        f.write_str(&names.join("|"))
    }
}

/// A change notification scoped to exactly one subscribed path, as produced
/// by a [`WatchBackend`](super::WatchBackend).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub op: Op,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, op: Op) -> Self {
        Self {
            path: path.into(),
            op,
        }
    }
}

/// Caller-facing event re-emitted by the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Path the operation applies to, as reported by the backend.
    pub path: PathBuf,
    /// Operation that triggered the event.
    pub op: Op,
}

impl Event {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl From<RawEvent> for Event {
    fn from(raw: RawEvent) -> Self {
        Self {
            path: raw.path,
            op: raw.op,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.op, self.path.display())
    }
}
