//! Recursive directory-tree watcher.
//!
//! The native notification APIs are driven strictly per path. This module
//! layers recursion on top by keeping an index of subscribed directories and
//! updating it from the event stream itself.
//!
//! # Architecture
//!
//! ```text
//! caller --watch/unwatch--> WatchState (WatchedDirs + backend, one lock)
//!                                ^                     |
//!                                |                 RawStreams
//!                       reactive register/drop         |
//!                                |                     v
//!                                +------------- Dispatcher thread
//!                                                      |
//!                                            events() / errors()
//! ```

mod backend;
mod error;
mod event;
mod recursive;
mod watched_dirs;

pub use backend::{NotifyBackend, RawSink, RawStreams, WatchBackend, raw_channels, translate};
pub use error::{WatchError, WatchResult};
pub use event::{Event, Op, RawEvent};
pub use recursive::{RecursiveWatcher, RecursiveWatcherBuilder};
