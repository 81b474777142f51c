//! Recursive watcher layered over a flat, per-path backend.
//!
//! Callers subscribe directories with [`RecursiveWatcher::watch`]. For a
//! recursive watch every existing subdirectory is subscribed as well, and a
//! background dispatch thread keeps the set of subscribed directories in step
//! with the tree: directories created beneath a recursive entry are
//! subscribed, removed or renamed directories are dropped together with their
//! recursive subtree.
//!
//! # Limitations
//!
//! - Registration is reactive. A subdirectory is subscribed only after its
//!   create event has been handled, so events for files written into it
//!   before that moment are never reported.
//! - The caller-facing channels are bounded. While they are full the
//!   dispatch thread blocks, and with it every further index update. Drain
//!   [`events`](RecursiveWatcher::events) and
//!   [`errors`](RecursiveWatcher::errors) promptly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;
use walkdir::WalkDir;

use super::backend::{NotifyBackend, RawStreams, WatchBackend};
use super::error::{WatchError, WatchResult};
use super::event::{Event, Op, RawEvent};
use super::watched_dirs::WatchedDirs;
use crate::config::WatcherConfig;
use crate::fs;

/// Directory index and backend handle, guarded together by one lock.
///
/// The lock is taken once per public call or raw event; recursion works on
/// the borrowed state and never re-locks.
struct WatchState<B> {
    dirs: WatchedDirs,
    /// `None` once the watcher has been shut down.
    backend: Option<B>,
}

impl<B: WatchBackend> WatchState<B> {
    fn backend(&mut self) -> WatchResult<&mut B> {
        self.backend.as_mut().ok_or(WatchError::Closed)
    }

    fn subscribe(&mut self, path: &Path) -> WatchResult<()> {
        self.backend()?
            .subscribe(path)
            .map_err(|source| WatchError::PathWatchFailed {
                path: path.to_path_buf(),
                source,
            })
    }

    fn unsubscribe(&mut self, path: &Path) -> WatchResult<()> {
        self.backend()?
            .unsubscribe(path)
            .map_err(|source| WatchError::PathUnwatchFailed {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Subscribe and index a directory, then its subdirectories if recursive.
    ///
    /// The entry is only indexed once its subscription succeeded. A failing
    /// subdirectory does not stop its siblings; the first error is returned.
    fn add_dir(&mut self, path: PathBuf, recursive: bool) -> WatchResult<()> {
        self.subscribe(&path)?;
        crate::debug_event!("watcher", "watching", "{}", path.display());

        if !recursive {
            self.dirs.insert(path, false);
            return Ok(());
        }

        let children = child_dirs(&path);
        self.dirs.insert(path, true);

        let mut first_error = None;
        for child in children {
            if let Err(e) = self.add_dir(child, true) {
                tracing::warn!("[watcher] {e}");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Unsubscribe and drop an indexed directory, then its current
    /// subdirectories if it was recursive. Unknown paths are a no-op.
    fn remove_dir(&mut self, path: &Path) -> WatchResult<()> {
        let Some(recursive) = self.dirs.remove(path) else {
            return Ok(());
        };
        crate::debug_event!("watcher", "unwatching", "{}", path.display());

        let mut first_error = self.unsubscribe(path).err();

        if recursive {
            for child in child_dirs(path) {
                if let Err(e) = self.remove_dir(&child) {
                    tracing::warn!("[watcher] {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Register a newly created directory beneath a recursive entry.
    ///
    /// Returns whether the directory was registered.
    fn on_create_dir(&mut self, path: &Path) -> WatchResult<bool> {
        if self.dirs.recursive_ancestors(path) == 0 {
            return Ok(false);
        }

        self.subscribe(path)?;
        self.dirs.insert(path.to_path_buf(), true);
        Ok(true)
    }

    /// Drop a removed or renamed path and every recursive entry beneath it.
    ///
    /// Works on the index alone since the directories are already gone.
    /// Returns the number of index entries removed.
    fn on_remove(&mut self, path: &Path) -> usize {
        let mut removed = 0;

        if let Err(e) = self.unsubscribe(path) {
            crate::debug_event!("watcher", "unsubscribe", "{e}");
        }
        if self.dirs.remove(path).is_some() {
            removed += 1;
        }

        for dir in self.dirs.recursive_descendants(path) {
            if let Err(e) = self.unsubscribe(&dir) {
                crate::debug_event!("watcher", "unsubscribe", "{e}");
            }
            self.dirs.remove(&dir);
            removed += 1;
        }

        removed
    }
}

/// Immediate subdirectories of `path`. Symlinks are not followed.
fn child_dirs(path: &Path) -> Vec<PathBuf> {
    WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("[watcher] cannot list {}: {e}", path.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}

/// Background loop translating raw backend output for the caller.
struct Dispatcher<B> {
    state: Arc<Mutex<WatchState<B>>>,
    raw: RawStreams,
    events: Sender<Event>,
    errors: Sender<WatchError>,
    shutdown: Receiver<()>,
}

impl<B: WatchBackend> Dispatcher<B> {
    fn run(self) {
        crate::debug_event!("watcher", "dispatch started");

        loop {
            let running = select! {
                recv(self.raw.events) -> msg => match msg {
                    Ok(raw) => self.handle_event(raw),
                    Err(_) => false,
                },
                recv(self.raw.errors) -> msg => match msg {
                    Ok(error) => {
                        crate::debug_event!("watcher", "backend error", "{error}");
                        self.deliver(&self.errors, WatchError::Event(error))
                    }
                    Err(_) => false,
                },
                recv(self.shutdown) -> _ => false,
            };

            if !running {
                break;
            }
        }

        crate::debug_event!("watcher", "dispatch stopped");
    }

    /// Update the index for a raw event, then forward it. Returns false when
    /// the loop should stop.
    fn handle_event(&self, raw: RawEvent) -> bool {
        let mut failures = Vec::new();

        if raw.op.contains(Op::CREATE) && fs::is_dir(&raw.path) {
            let mut state = self.state.lock();
            match state.on_create_dir(&raw.path) {
                Ok(true) => crate::log_event!("watcher", "registered", "{}", raw.path.display()),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("[watcher] {e}");
                    failures.push(e);
                }
            }
        }

        if raw.op.is_removal() {
            let removed = self.state.lock().on_remove(&raw.path);
            if removed > 0 {
                crate::log_event!(
                    "watcher",
                    "unregistered",
                    "{} ({removed} directories)",
                    raw.path.display()
                );
            }
        }

        // Errors go out only after the lock is released.
        for error in failures {
            if !self.deliver(&self.errors, error) {
                return false;
            }
        }

        self.deliver(&self.events, Event::from(raw))
    }

    /// Blocking send that gives up when shutdown is signalled.
    fn deliver<T>(&self, tx: &Sender<T>, item: T) -> bool {
        select! {
            send(tx, item) -> res => res.is_ok(),
            recv(self.shutdown) -> _ => false,
        }
    }
}

/// Directory watcher with transparent recursion over a flat backend.
///
/// Construct with [`RecursiveWatcher::new`] or [`RecursiveWatcher::builder`].
/// Dropping the watcher shuts it down.
pub struct RecursiveWatcher<B: WatchBackend = NotifyBackend> {
    state: Arc<Mutex<WatchState<B>>>,
    events: Receiver<Event>,
    errors: Receiver<WatchError>,
    shutdown_tx: Option<Sender<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl RecursiveWatcher<NotifyBackend> {
    /// Create a watcher over the platform's native notification API with
    /// default buffer sizes.
    pub fn new() -> WatchResult<Self> {
        RecursiveWatcherBuilder::new().build()
    }

    /// Create a builder for configuring the watcher.
    pub fn builder() -> RecursiveWatcherBuilder {
        RecursiveWatcherBuilder::new()
    }
}

impl<B: WatchBackend> RecursiveWatcher<B> {
    /// Watch `path`. Directories watched with `recursive` also watch every
    /// subdirectory, now and as they are created.
    ///
    /// Non-directories get a flat subscription and are not indexed. Watching
    /// an already watched directory overwrites its recursive flag.
    pub fn watch(&self, path: impl AsRef<Path>, recursive: bool) -> WatchResult<()> {
        let absolute = resolve(path.as_ref())?;
        let mut state = self.state.lock();
        state.backend()?;

        if !fs::is_dir(&absolute) {
            crate::debug_event!("watcher", "watching file", "{}", absolute.display());
            return state.subscribe(&absolute);
        }

        state.add_dir(absolute, recursive)
    }

    /// Stop watching `path`, including the recursive subtree of a recursively
    /// watched directory. Unwatching an unwatched directory is a no-op.
    pub fn unwatch(&self, path: impl AsRef<Path>) -> WatchResult<()> {
        let absolute = resolve(path.as_ref())?;
        let mut state = self.state.lock();
        state.backend()?;

        if !fs::is_dir(&absolute) {
            return state.unsubscribe(&absolute);
        }

        state.remove_dir(&absolute)
    }

    /// Normalized events, in the order the backend produced them.
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Backend errors and failed reactive registrations.
    pub fn errors(&self) -> &Receiver<WatchError> {
        &self.errors
    }

    /// Sorted snapshot of watched directories and their recursive flags.
    pub fn watched_dirs(&self) -> Vec<(PathBuf, bool)> {
        self.state.lock().dirs.snapshot()
    }

    /// Whether `path` is an indexed directory.
    pub fn is_watched(&self, path: impl AsRef<Path>) -> bool {
        match fs::resolve_absolute(path) {
            Ok(absolute) => self.state.lock().dirs.contains(&absolute),
            Err(_) => false,
        }
    }

    /// Number of indexed directories.
    pub fn watched_count(&self) -> usize {
        self.state.lock().dirs.len()
    }

    /// Stop the dispatch thread and close the backend.
    ///
    /// Events already queued stay readable; afterwards both streams report
    /// disconnection and `watch`/`unwatch` fail with [`WatchError::Closed`].
    /// Calling this more than once is harmless.
    pub fn shutdown(&mut self) {
        // Dropping the sender wakes the dispatcher wherever it is blocked.
        self.shutdown_tx.take();

        if let Some(handle) = self.dispatcher.take()
            && handle.join().is_err()
        {
            tracing::error!("[watcher] dispatch thread panicked");
        }

        let mut state = self.state.lock();
        if let Some(backend) = state.backend.take() {
            let released = state.dirs.drain().len();
            drop(backend);
            crate::log_event!("watcher", "stopped", "released {released} directories");
        }
    }
}

impl<B: WatchBackend> Drop for RecursiveWatcher<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve(path: &Path) -> WatchResult<PathBuf> {
    fs::resolve_absolute(path).map_err(|source| WatchError::PathResolution {
        path: path.to_path_buf(),
        source,
    })
}

/// Builder for constructing a [`RecursiveWatcher`].
#[derive(Debug, Clone)]
pub struct RecursiveWatcherBuilder {
    event_capacity: usize,
    error_capacity: usize,
}

impl RecursiveWatcherBuilder {
    /// Create a new builder with default capacities.
    pub fn new() -> Self {
        Self::from_config(&WatcherConfig::default())
    }

    /// Take capacities from loaded settings.
    pub fn from_config(config: &WatcherConfig) -> Self {
        Self {
            event_capacity: config.event_capacity,
            error_capacity: config.error_capacity,
        }
    }

    /// Set how many events may wait before the dispatch thread blocks.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set how many errors may wait before the dispatch thread blocks.
    pub fn error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = capacity;
        self
    }

    /// Build over the platform's native notification API.
    pub fn build(self) -> WatchResult<RecursiveWatcher<NotifyBackend>> {
        let (backend, raw) = NotifyBackend::new()?;
        self.build_with_backend(backend, raw)
    }

    /// Build over a custom backend and the raw streams it feeds.
    pub fn build_with_backend<B: WatchBackend>(
        self,
        backend: B,
        raw: RawStreams,
    ) -> WatchResult<RecursiveWatcher<B>> {
        let state = Arc::new(Mutex::new(WatchState {
            dirs: WatchedDirs::new(),
            backend: Some(backend),
        }));

        let (event_tx, event_rx) = bounded(self.event_capacity);
        let (error_tx, error_rx) = bounded(self.error_capacity);
        let (shutdown_tx, shutdown_rx) = bounded(0);

        let dispatcher = Dispatcher {
            state: state.clone(),
            raw,
            events: event_tx,
            errors: error_tx,
            shutdown: shutdown_rx,
        };

        let handle = thread::Builder::new()
            .name("treewatch-dispatch".to_string())
            .spawn(move || dispatcher.run())
            .map_err(|e| WatchError::InitFailed {
                reason: format!("cannot spawn dispatch thread: {e}"),
            })?;

        Ok(RecursiveWatcher {
            state,
            events: event_rx,
            errors: error_rx,
            shutdown_tx: Some(shutdown_tx),
            dispatcher: Some(handle),
        })
    }
}

impl Default for RecursiveWatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::backend::{RawSink, raw_channels};
    use std::collections::HashSet;
    use std::time::Duration;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// In-memory backend recording its subscriptions.
    #[derive(Clone, Default)]
    struct RecordingBackend {
        subscribed: Arc<Mutex<HashSet<PathBuf>>>,
        refused: Arc<Mutex<HashSet<PathBuf>>>,
    }

    impl RecordingBackend {
        fn is_subscribed(&self, path: &Path) -> bool {
            self.subscribed.lock().contains(path)
        }

        fn subscription_count(&self) -> usize {
            self.subscribed.lock().len()
        }

        fn refuse(&self, path: &Path) {
            self.refused.lock().insert(path.to_path_buf());
        }
    }

    impl WatchBackend for RecordingBackend {
        fn subscribe(&mut self, path: &Path) -> Result<(), notify::Error> {
            if self.refused.lock().contains(path) {
                return Err(notify::Error::generic("refused").add_path(path.to_path_buf()));
            }
            self.subscribed.lock().insert(path.to_path_buf());
            Ok(())
        }

        fn unsubscribe(&mut self, path: &Path) -> Result<(), notify::Error> {
            self.subscribed.lock().remove(path);
            Ok(())
        }
    }

    fn setup_with(
        builder: RecursiveWatcherBuilder,
    ) -> (RecursiveWatcher<RecordingBackend>, RecordingBackend, RawSink) {
        let backend = RecordingBackend::default();
        let (sink, raw) = raw_channels();
        let watcher = builder.build_with_backend(backend.clone(), raw).unwrap();
        (watcher, backend, sink)
    }

    fn setup() -> (RecursiveWatcher<RecordingBackend>, RecordingBackend, RawSink) {
        setup_with(RecursiveWatcherBuilder::new())
    }

    fn mkdirs(root: &Path, dirs: &[&str]) {
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
    }

    fn next_event(watcher: &RecursiveWatcher<RecordingBackend>) -> Event {
        watcher.events().recv_timeout(TIMEOUT).unwrap()
    }

    #[test]
    fn test_recursive_watch_indexes_existing_tree() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        mkdirs(root, &["a/b", "c"]);
        std::fs::write(root.join("file.txt"), "x").unwrap();

        let (watcher, backend, _sink) = setup();
        watcher.watch(root, true).unwrap();

        assert_eq!(
            watcher.watched_dirs(),
            vec![
                (root.to_path_buf(), true),
                (root.join("a"), true),
                (root.join("a/b"), true),
                (root.join("c"), true),
            ]
        );
        assert_eq!(backend.subscription_count(), 4);
        assert!(!backend.is_subscribed(&root.join("file.txt")));
    }

    #[test]
    fn test_non_recursive_watch_indexes_only_root() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["a"]);

        let (watcher, backend, _sink) = setup();
        watcher.watch(temp.path(), false).unwrap();

        assert_eq!(watcher.watched_dirs(), vec![(temp.path().to_path_buf(), false)]);
        assert!(!backend.is_subscribed(&temp.path().join("a")));
    }

    #[test]
    fn test_watch_file_is_flat_and_unindexed() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        let (watcher, backend, _sink) = setup();
        watcher.watch(&file, true).unwrap();

        assert!(backend.is_subscribed(&file));
        assert_eq!(watcher.watched_count(), 0);

        watcher.unwatch(&file).unwrap();
        assert!(!backend.is_subscribed(&file));
    }

    #[test]
    fn test_watch_twice_is_idempotent() {
        let temp = TempDir::new().unwrap();

        let (watcher, _backend, _sink) = setup();
        watcher.watch(temp.path(), true).unwrap();
        watcher.watch(temp.path(), true).unwrap();
        assert_eq!(watcher.watched_count(), 1);

        // A second call overwrites the flag
        watcher.watch(temp.path(), false).unwrap();
        assert_eq!(watcher.watched_dirs(), vec![(temp.path().to_path_buf(), false)]);
    }

    #[test]
    fn test_watch_resolves_relative_components() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["a"]);

        let (watcher, _backend, _sink) = setup();
        watcher.watch(temp.path().join("a/../a/."), false).unwrap();

        assert!(watcher.is_watched(temp.path().join("a")));
    }

    #[test]
    fn test_empty_path_is_resolution_error() {
        let (watcher, _backend, _sink) = setup();

        let err = watcher.watch("", true).unwrap_err();
        assert!(matches!(err, WatchError::PathResolution { .. }));

        let err = watcher.unwatch("").unwrap_err();
        assert!(matches!(err, WatchError::PathResolution { .. }));
    }

    #[test]
    fn test_refused_subscription_is_not_indexed() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["a", "b"]);

        let (watcher, backend, _sink) = setup();
        backend.refuse(&temp.path().join("a"));

        let err = watcher.watch(temp.path(), true).unwrap_err();
        assert!(matches!(err, WatchError::PathWatchFailed { ref path, .. } if path == &temp.path().join("a")));

        // Sibling still registered, refused child absent
        assert!(watcher.is_watched(temp.path()));
        assert!(watcher.is_watched(temp.path().join("b")));
        assert!(!watcher.is_watched(temp.path().join("a")));
    }

    #[test]
    fn test_unwatch_removes_recursive_subtree() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["a/b/c", "d"]);

        let (watcher, backend, _sink) = setup();
        watcher.watch(temp.path(), true).unwrap();
        assert_eq!(watcher.watched_count(), 5);

        watcher.unwatch(temp.path()).unwrap();

        assert_eq!(watcher.watched_count(), 0);
        assert_eq!(backend.subscription_count(), 0);
    }

    #[test]
    fn test_unwatch_non_recursive_keeps_children() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["a"]);

        let (watcher, _backend, _sink) = setup();
        watcher.watch(temp.path().join("a"), false).unwrap();
        watcher.watch(temp.path(), false).unwrap();

        watcher.unwatch(temp.path()).unwrap();

        assert_eq!(watcher.watched_dirs(), vec![(temp.path().join("a"), false)]);
    }

    #[test]
    fn test_unwatch_unknown_path_is_noop() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["watched", "other"]);

        let (watcher, _backend, _sink) = setup();
        watcher.watch(temp.path().join("watched"), true).unwrap();
        let before = watcher.watched_dirs();

        watcher.unwatch(temp.path().join("other")).unwrap();

        assert_eq!(watcher.watched_dirs(), before);
    }

    #[test]
    fn test_created_directory_is_registered() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let (watcher, backend, sink) = setup();
        watcher.watch(root, true).unwrap();

        mkdirs(root, &["a"]);
        sink.send_event(RawEvent::new(root.join("a"), Op::CREATE));

        let event = next_event(&watcher);
        assert_eq!(event.path, root.join("a"));
        assert_eq!(event.op, Op::CREATE);

        // Bookkeeping happens before the event is forwarded
        assert_eq!(watcher.watched_dirs()[1], (root.join("a"), true));
        assert!(backend.is_subscribed(&root.join("a")));

        std::fs::write(root.join("a/b.txt"), "x").unwrap();
        sink.send_event(RawEvent::new(root.join("a/b.txt"), Op::CREATE));

        let event = next_event(&watcher);
        assert_eq!(event.path, root.join("a/b.txt"));
        assert_eq!(event.op, Op::CREATE);
        assert_eq!(watcher.watched_count(), 2);

        std::fs::remove_dir_all(root.join("a")).unwrap();
        sink.send_event(RawEvent::new(root.join("a"), Op::REMOVE));

        let event = next_event(&watcher);
        assert_eq!(event.path, root.join("a"));
        assert_eq!(event.op, Op::REMOVE);
        assert!(!watcher.is_watched(root.join("a")));
        assert!(!backend.is_subscribed(&root.join("a")));
    }

    #[test]
    fn test_created_directory_under_flat_watch_is_not_registered() {
        let temp = TempDir::new().unwrap();

        let (watcher, backend, sink) = setup();
        watcher.watch(temp.path(), false).unwrap();

        mkdirs(temp.path(), &["a"]);
        sink.send_event(RawEvent::new(temp.path().join("a"), Op::CREATE));

        // Event is still delivered
        assert_eq!(next_event(&watcher).path, temp.path().join("a"));
        assert_eq!(watcher.watched_count(), 1);
        assert!(!backend.is_subscribed(&temp.path().join("a")));
    }

    #[test]
    fn test_created_file_is_not_registered() {
        let temp = TempDir::new().unwrap();

        let (watcher, _backend, sink) = setup();
        watcher.watch(temp.path(), true).unwrap();

        std::fs::write(temp.path().join("f.txt"), "x").unwrap();
        sink.send_event(RawEvent::new(temp.path().join("f.txt"), Op::CREATE));

        assert_eq!(next_event(&watcher).op, Op::CREATE);
        assert_eq!(watcher.watched_count(), 1);
    }

    #[test]
    fn test_removed_directory_takes_subtree() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        mkdirs(root, &["d/x/z", "d/y", "keep"]);

        let (watcher, backend, sink) = setup();
        watcher.watch(root, true).unwrap();
        assert_eq!(watcher.watched_count(), 6);

        std::fs::remove_dir_all(root.join("d")).unwrap();
        sink.send_event(RawEvent::new(root.join("d"), Op::REMOVE));
        next_event(&watcher);

        // d plus its three subdirectories
        assert_eq!(
            watcher.watched_dirs(),
            vec![(root.to_path_buf(), true), (root.join("keep"), true)]
        );
        assert_eq!(backend.subscription_count(), 2);
    }

    #[test]
    fn test_renamed_directory_is_dropped_and_target_registered() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        mkdirs(root, &["old/inner"]);

        let (watcher, _backend, sink) = setup();
        watcher.watch(root, true).unwrap();

        std::fs::rename(root.join("old"), root.join("new")).unwrap();
        sink.send_event(RawEvent::new(root.join("old"), Op::RENAME));
        sink.send_event(RawEvent::new(root.join("new"), Op::CREATE));

        assert_eq!(next_event(&watcher).op, Op::RENAME);
        assert_eq!(next_event(&watcher).op, Op::CREATE);

        assert!(!watcher.is_watched(root.join("old")));
        assert!(!watcher.is_watched(root.join("old/inner")));
        assert!(watcher.is_watched(root.join("new")));
    }

    #[test]
    fn test_refused_reactive_registration_reports_error() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();

        let (watcher, backend, sink) = setup();
        watcher.watch(root, true).unwrap();

        mkdirs(root, &["bad"]);
        backend.refuse(&root.join("bad"));
        sink.send_event(RawEvent::new(root.join("bad"), Op::CREATE));

        let error = watcher.errors().recv_timeout(TIMEOUT).unwrap();
        assert!(matches!(error, WatchError::PathWatchFailed { .. }));

        // Event still delivered, index untouched
        assert_eq!(next_event(&watcher).path, root.join("bad"));
        assert!(!watcher.is_watched(root.join("bad")));
    }

    #[test]
    fn test_backend_errors_are_forwarded() {
        let (watcher, _backend, sink) = setup();

        sink.send_error(notify::Error::generic("queue overflow"));

        let error = watcher.errors().recv_timeout(TIMEOUT).unwrap();
        match error {
            WatchError::Event(inner) => assert!(inner.to_string().contains("queue overflow")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_events_keep_backend_order() {
        let (watcher, _backend, sink) = setup();

        let ops = [Op::CREATE, Op::WRITE, Op::CHMOD, Op::WRITE, Op::REMOVE];
        for (i, op) in ops.iter().enumerate() {
            sink.send_event(RawEvent::new(format!("/nowhere/file{i}"), *op));
        }

        let received: Vec<Op> = (0..ops.len()).map(|_| next_event(&watcher).op).collect();
        assert_eq!(received, ops);
    }

    #[test]
    fn test_shutdown_closes_watcher() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["a"]);

        let (mut watcher, _backend, sink) = setup();
        watcher.watch(temp.path(), true).unwrap();

        watcher.shutdown();
        watcher.shutdown();

        assert_eq!(watcher.watched_count(), 0);
        assert!(matches!(
            watcher.watch(temp.path(), true),
            Err(WatchError::Closed)
        ));
        assert!(matches!(watcher.unwatch(temp.path()), Err(WatchError::Closed)));

        // Raw streams were dropped with the dispatcher
        assert!(!sink.send_event(RawEvent::new(temp.path(), Op::WRITE)));
        assert!(watcher.events().recv_timeout(TIMEOUT).is_err());
    }

    #[test]
    fn test_closed_watcher_rejects_every_path_kind() {
        let temp = TempDir::new().unwrap();
        mkdirs(temp.path(), &["never_watched"]);
        let file = temp.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();

        let (mut watcher, backend, _sink) = setup();
        watcher.shutdown();

        for path in [
            temp.path().join("never_watched"),
            file,
            temp.path().join("missing"),
        ] {
            assert!(
                matches!(watcher.unwatch(&path), Err(WatchError::Closed)),
                "unwatch {} on a closed watcher",
                path.display()
            );
            assert!(
                matches!(watcher.watch(&path, false), Err(WatchError::Closed)),
                "watch {} on a closed watcher",
                path.display()
            );
        }
        assert_eq!(backend.subscription_count(), 0);
    }

    #[test]
    fn test_shutdown_with_undrained_events() {
        let (mut watcher, _backend, sink) =
            setup_with(RecursiveWatcherBuilder::new().event_capacity(1));

        for i in 0..5 {
            sink.send_event(RawEvent::new(format!("/nowhere/{i}"), Op::WRITE));
        }
        // Let the dispatcher fill the channel and block on the next send
        let first = next_event(&watcher);
        assert_eq!(first.path, PathBuf::from("/nowhere/0"));

        // Returns even though the dispatcher is blocked on a full channel
        watcher.shutdown();
    }
}
