//! Filesystem watch adapter: turns raw `notify` events for one directory
//! into a pollable queue of write-close / delete notifications that the
//! store drains once per tick.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use notify::event::{AccessKind, AccessMode, EventKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

/// Change notifications as the reconcile step consumes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    /// A file was created or finished being written. The two are
    /// indistinguishable at this granularity and handled identically.
    Changed(PathBuf),
    /// A file was removed.
    Removed(PathBuf),
}

fn map_event(kind: &EventKind, path: PathBuf) -> Option<FsEvent> {
    match kind {
        EventKind::Create(_)
        | EventKind::Modify(_)
        | EventKind::Access(AccessKind::Close(AccessMode::Write)) => Some(FsEvent::Changed(path)),
        EventKind::Remove(_) => Some(FsEvent::Removed(path)),
        _ => None,
    }
}

/// An open subscription to change events for a single directory
/// (non-recursive). Drop to tear the watch down.
pub struct DirWatch {
    rx: mpsc::Receiver<FsEvent>,
    // Kept alive for the subscription's lifetime; events arrive via `rx`.
    _watcher: RecommendedWatcher,
}

impl DirWatch {
    pub fn open(dir: &Path) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else { return };
            for path in event.paths {
                if let Some(ev) = map_event(&event.kind, path) {
                    // Receiver gone means the store shut down first.
                    let _ = tx.send(ev);
                }
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(Self { rx, _watcher: watcher })
    }

    /// Pull everything that has arrived since the last call. Non-blocking;
    /// an empty queue yields an empty vec.
    pub fn drain(&self) -> Vec<FsEvent> {
        self.rx.try_iter().collect()
    }
}
