pub mod config;
pub mod fs;
pub mod logging;
pub mod watcher;

pub use config::{LoggingConfig, Settings, WatcherConfig};
pub use watcher::{
    Event, NotifyBackend, Op, RawEvent, RawStreams, RecursiveWatcher, RecursiveWatcherBuilder,
    WatchBackend, WatchError, WatchResult,
};
