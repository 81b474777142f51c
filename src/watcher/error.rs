//! Error types for the recursive watcher.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot resolve absolute path for {path}: {source}")]
    PathResolution {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot watch path {path}: {source}")]
    PathWatchFailed {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Cannot unwatch path {path}: {source}")]
    PathUnwatchFailed {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("File system event error: {0}")]
    Event(#[source] notify::Error),

    #[error("Failed to load config: {reason}")]
    Config { reason: String },

    #[error("Watcher has been shut down")]
    Closed,
}

pub type WatchResult<T> = Result<T, WatchError>;
