//! Flat, per-path notification backends.
//!
//! A backend only knows how to subscribe and unsubscribe single paths. It
//! reports what it sees through a [`RawSink`], whose receiving half
//! ([`RawStreams`]) is consumed by the dispatch loop of
//! [`RecursiveWatcher`](super::RecursiveWatcher).

use std::path::Path;

use crossbeam_channel::{Receiver, Sender, unbounded};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};

use super::error::{WatchError, WatchResult};
use super::event::{Op, RawEvent};
use crate::fs;

/// Per-path subscription primitive with no native recursion.
///
/// Dropping the backend closes it: no raw events are produced afterwards and
/// the associated [`RawStreams`] disconnect.
pub trait WatchBackend: Send + 'static {
    /// Begin receiving raw events for exactly this path.
    fn subscribe(&mut self, path: &Path) -> Result<(), notify::Error>;

    /// Stop receiving raw events for this path.
    ///
    /// Unsubscribing a path that is not subscribed succeeds.
    fn unsubscribe(&mut self, path: &Path) -> Result<(), notify::Error>;
}

/// Sending half of a backend's raw event and error channels.
#[derive(Debug, Clone)]
pub struct RawSink {
    events: Sender<RawEvent>,
    errors: Sender<notify::Error>,
}

/// Receiving half of a backend's raw event and error channels.
#[derive(Debug)]
pub struct RawStreams {
    pub events: Receiver<RawEvent>,
    pub errors: Receiver<notify::Error>,
}

/// Create a connected raw sink and stream pair.
///
/// The channels are unbounded: backends deliver from their own threads and
/// may be asked to subscribe a path while the dispatch loop is busy, so they
/// must never block on delivery.
pub fn raw_channels() -> (RawSink, RawStreams) {
    let (event_tx, event_rx) = unbounded();
    let (error_tx, error_rx) = unbounded();

    (
        RawSink {
            events: event_tx,
            errors: error_tx,
        },
        RawStreams {
            events: event_rx,
            errors: error_rx,
        },
    )
}

impl RawSink {
    /// Push a raw event. Returns false once the streams have been dropped.
    pub fn send_event(&self, event: RawEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Push a raw error. Returns false once the streams have been dropped.
    pub fn send_error(&self, error: notify::Error) -> bool {
        self.errors.send(error).is_ok()
    }

    /// Translate a notify callback result into raw events or errors.
    pub fn forward(&self, res: notify::Result<notify::Event>) {
        match res {
            Ok(event) => {
                for path in event.paths {
                    if let Some(op) = translate(&event.kind, &path) {
                        self.send_event(RawEvent::new(path, op));
                    }
                }
            }
            Err(e) => {
                self.send_error(e);
            }
        }
    }
}

/// Map a notify event kind onto a single [`Op`] flag.
///
/// Returns `None` for kinds that carry no structural or content change
/// (access, unclassified) and for paired renames, whose `From` and `To`
/// halves are delivered as separate events.
pub fn translate(kind: &EventKind, path: &Path) -> Option<Op> {
    match kind {
        EventKind::Create(_) => Some(Op::CREATE),
        EventKind::Remove(_) => Some(Op::REMOVE),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(Op::CHMOD),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Op::RENAME),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Op::CREATE),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => None,
        // Unpaired renames (e.g. FSEvents): the surviving side is the new name.
        EventKind::Modify(ModifyKind::Name(_)) => {
            if fs::exists(path) {
                Some(Op::CREATE)
            } else {
                Some(Op::RENAME)
            }
        }
        EventKind::Modify(_) => Some(Op::WRITE),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Backend over the platform's recommended `notify` watcher, used strictly in
/// non-recursive mode.
pub struct NotifyBackend {
    watcher: notify::RecommendedWatcher,
}

impl NotifyBackend {
    /// Create the OS watcher and the raw streams it feeds.
    pub fn new() -> WatchResult<(Self, RawStreams)> {
        let (sink, streams) = raw_channels();

        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            sink.forward(res);
        })
        .map_err(|e| WatchError::InitFailed {
            reason: e.to_string(),
        })?;

        Ok((Self { watcher }, streams))
    }
}

impl WatchBackend for NotifyBackend {
    fn subscribe(&mut self, path: &Path) -> Result<(), notify::Error> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)
    }

    fn unsubscribe(&mut self, path: &Path) -> Result<(), notify::Error> {
        match self.watcher.unwatch(path) {
            Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => Ok(()),
            other => other,
        }
    }
}
